#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Conversation state and structured chat turns.
//!
//! [`ConversationStore`] gives typed access to one conversation's fields,
//! [`ResilientCompletion`] runs a chat turn with bounded retries, and
//! [`ConversationService`] wraps both behind per-conversation locks.

mod completion;
mod error;
mod history;
mod prompt;
mod service;
mod store;

pub use completion::{
    AttemptError, CompletionPolicy, ResilientCompletion, TurnOutcome, extract_reply,
};
pub use error::{ConversationError, Result};
pub use history::HistoryWindow;
pub use prompt::{
    REPLY_FIELD, RETRY_ACKNOWLEDGEMENT, RETRY_FEEDBACK, build_messages, embedded_history_prompt,
    retry_feedback, task_prompt,
};
pub use service::{CheckpointLoad, ConversationLocks, ConversationService};
pub use store::{ConversationStore, DEFAULT_CONTEXT, DEFAULT_WINDOW_SIZE, LATEST_CHECKPOINT};
