use relay_core::StoreError;
use thiserror::Error;

/// Errors from the conversation command surface.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Conversation storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Window size must be a positive integer, got {0}")]
    InvalidWindowSize(usize),

    #[error("Failed to render history: {0}")]
    Render(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConversationError>;
