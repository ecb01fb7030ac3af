use relay_conversation::ConversationError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Telegram API error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),

    #[error("Unauthorized access from chat_id: {0}")]
    Unauthorized(i64),
}
