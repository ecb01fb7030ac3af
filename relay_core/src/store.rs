//! Key-value storage contract shared by every persistence backend.
//!
//! Keys are typed: a [`StoreKey`] always names one conversation and one
//! field inside it, so backends can lay data out per conversation and no
//! caller ever concatenates key strings by hand.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

static NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").ok());

const HISTORY: &str = "history";
const CONTEXT: &str = "context";
const WINDOW_SIZE: &str = "window_size";

/// Field names a checkpoint may not shadow.
pub const RESERVED_FIELDS: [&str; 3] = [HISTORY, CONTEXT, WINDOW_SIZE];

fn is_valid_name(name: &str) -> bool {
    NAME_RE.as_ref().is_some_and(|re| re.is_match(name))
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(StoreKey),

    #[error("invalid conversation id: {0:?}")]
    InvalidConversationId(String),

    #[error("invalid checkpoint name: {0:?}")]
    InvalidCheckpointName(String),

    #[error("stored value for {key} has unexpected shape: {source}")]
    Decode {
        key: StoreKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Opaque conversation identifier supplied by the chat transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Result<Self, StoreError> {
        let id = id.into();
        if is_valid_name(&id) {
            Ok(Self(id))
        } else {
            Err(StoreError::InvalidConversationId(id))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for ConversationId {
    fn from(chat_id: i64) -> Self {
        Self(chat_id.to_string())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One field of one conversation. Renders as `<conversation>_<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    conversation: ConversationId,
    name: String,
}

impl StoreKey {
    #[must_use]
    pub fn history(conversation: &ConversationId) -> Self {
        Self::field(conversation, HISTORY)
    }

    #[must_use]
    pub fn context(conversation: &ConversationId) -> Self {
        Self::field(conversation, CONTEXT)
    }

    #[must_use]
    pub fn window_size(conversation: &ConversationId) -> Self {
        Self::field(conversation, WINDOW_SIZE)
    }

    /// Key of a named history snapshot.
    ///
    /// Names must match `[A-Za-z0-9_-]{1,64}`, may not start with `_` and
    /// may not collide with a conversation field.
    pub fn checkpoint(conversation: &ConversationId, name: &str) -> Result<Self, StoreError> {
        if !is_valid_name(name) || name.starts_with('_') || RESERVED_FIELDS.contains(&name) {
            return Err(StoreError::InvalidCheckpointName(name.to_string()));
        }
        Ok(Self::field(conversation, name))
    }

    fn field(conversation: &ConversationId, name: &str) -> Self {
        Self {
            conversation: conversation.clone(),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub const fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.conversation, self.name)
    }
}

/// Durable mapping from [`StoreKey`] to a JSON value.
///
/// `get` reports a missing key as [`StoreError::NotFound`] so callers can
/// tell it apart from backend failures; [`KeyValueStore::get_or`] turns it
/// into a default.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &StoreKey) -> Result<Value, StoreError>;

    async fn set(&self, key: &StoreKey, value: Value) -> Result<(), StoreError>;

    async fn delete(&self, key: &StoreKey) -> Result<(), StoreError>;

    async fn get_or(&self, key: &StoreKey, default: Value) -> Result<Value, StoreError> {
        match self.get(key).await {
            Ok(value) => Ok(value),
            Err(StoreError::NotFound(_)) => Ok(default),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    async fn get(&self, key: &StoreKey) -> Result<Value, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &StoreKey, value: Value) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &StoreKey) -> Result<(), StoreError> {
        (**self).delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_render_per_conversation() {
        let id = ConversationId::from(-1_001_234_i64);
        assert_eq!(StoreKey::history(&id).to_string(), "-1001234_history");
        assert_eq!(StoreKey::context(&id).to_string(), "-1001234_context");
        assert_eq!(StoreKey::window_size(&id).to_string(), "-1001234_window_size");
        let latest = StoreKey::checkpoint(&id, "latest").unwrap();
        assert_eq!(latest.to_string(), "-1001234_latest");
        assert_eq!(latest.name(), "latest");
    }

    #[test]
    fn checkpoint_names_cannot_shadow_fields() {
        let id = ConversationId::from(7_i64);
        for name in RESERVED_FIELDS {
            assert!(matches!(
                StoreKey::checkpoint(&id, name),
                Err(StoreError::InvalidCheckpointName(_))
            ));
        }
    }

    #[test]
    fn checkpoint_names_are_restricted() {
        let id = ConversationId::from(7_i64);
        assert!(StoreKey::checkpoint(&id, "before-the-fight_2").is_ok());
        assert!(StoreKey::checkpoint(&id, "").is_err());
        assert!(StoreKey::checkpoint(&id, "../etc").is_err());
        assert!(StoreKey::checkpoint(&id, "has space").is_err());
        assert!(StoreKey::checkpoint(&id, "_hidden").is_err());
        assert!(StoreKey::checkpoint(&id, &"x".repeat(65)).is_err());
    }

    #[test]
    fn conversation_ids_are_restricted() {
        assert!(ConversationId::new("cli-default").is_ok());
        assert!(ConversationId::new("a/b").is_err());
        assert!(ConversationId::new("").is_err());
    }
}
