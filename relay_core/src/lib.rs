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

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod repair;
pub mod store;
pub mod util;

pub use repair::{RepairError, repair_structured_text};
pub use store::{ConversationId, KeyValueStore, StoreError, StoreKey};
pub use util::{TELEGRAM_MESSAGE_LIMIT, split_message};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// How conversation history is presented to the model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    /// Windowed history as chat turns, then the task prompt as the last user turn.
    #[default]
    Conversational,
    /// A single user turn whose task prompt embeds the windowed history as JSON.
    EmbeddedHistory,
}

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
    /// Deliver the generation incrementally and accumulate it client-side.
    pub stream: bool,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            model: "llama-3.1-70b-versatile".to_string(),
            temperature: 1.0,
            top_p: 1.0,
            max_tokens: 1024,
            stream: true,
        }
    }
}

/// A remote LLM that turns a message list into generated text.
///
/// Implementations return the fully accumulated text even when the provider
/// streams its output. Any failure is reported as an error and is treated by
/// callers as a transport failure.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> anyhow::Result<String>;
}

#[async_trait]
impl<T: CompletionClient + ?Sized> CompletionClient for std::sync::Arc<T> {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> anyhow::Result<String> {
        (**self).complete(messages, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_serializes_with_lowercase_role() {
        let msg = ChatMessage::assistant("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn only_user_and_assistant_roles_exist() {
        let user: ChatMessage =
            serde_json::from_value(serde_json::json!({"role": "user", "content": "q"})).unwrap();
        assert_eq!(user, ChatMessage::user("q"));
        assert!(
            serde_json::from_value::<ChatMessage>(
                serde_json::json!({"role": "system", "content": "x"})
            )
            .is_err()
        );
    }

    #[test]
    fn default_sampling_params() {
        let params = SamplingParams::default();
        assert!((params.temperature - 1.0).abs() < f32::EPSILON);
        assert!((params.top_p - 1.0).abs() < f32::EPSILON);
        assert_eq!(params.max_tokens, 1024);
        assert!(params.stream);
    }
}
