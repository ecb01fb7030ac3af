//! Typed, per-conversation view over a [`KeyValueStore`].
//!
//! Every field is created lazily: reading a field that was never written
//! returns its default. Each operation touches a single key; there is no
//! cross-key atomicity here, callers that need it hold the conversation lock.

use relay_core::{ChatMessage, ConversationId, KeyValueStore, StoreError, StoreKey};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ConversationError, Result};
use crate::history::HistoryWindow;

pub const DEFAULT_CONTEXT: &str = "default";
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Checkpoint rewritten before every chat turn; `undo` restores it.
pub const LATEST_CHECKPOINT: &str = "latest";

#[derive(Clone)]
pub struct ConversationStore<S = Arc<dyn KeyValueStore>> {
    store: S,
}

impl<S: KeyValueStore> ConversationStore<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// `None` when the key was never written. Fields are never stored as
    /// JSON `null`, so `null` doubles as the missing marker.
    async fn read<T: DeserializeOwned>(&self, key: &StoreKey) -> Result<Option<T>> {
        let value = self.store.get_or(key, Value::Null).await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| {
                StoreError::Decode {
                    key: key.clone(),
                    source,
                }
                .into()
            })
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &StoreKey, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Decode {
            key: key.clone(),
            source,
        })?;
        self.store.set(key, value).await?;
        debug!("Wrote {key}");
        Ok(())
    }

    /// The whole stored history, unwindowed.
    pub async fn full_history(&self, id: &ConversationId) -> Result<Vec<ChatMessage>> {
        Ok(self
            .read(&StoreKey::history(id))
            .await?
            .unwrap_or_default())
    }

    /// The most recent `window_size` turns, oldest first.
    pub async fn history(&self, id: &ConversationId) -> Result<Vec<ChatMessage>> {
        let window = HistoryWindow::new(self.window_size(id).await?);
        Ok(window.truncate(self.full_history(id).await?))
    }

    /// Replace the stored history.
    pub async fn update_history(&self, id: &ConversationId, messages: &[ChatMessage]) -> Result<()> {
        self.write(&StoreKey::history(id), messages).await
    }

    pub async fn clear_history(&self, id: &ConversationId) -> Result<()> {
        self.update_history(id, &[]).await
    }

    pub async fn context(&self, id: &ConversationId) -> Result<String> {
        Ok(self
            .read(&StoreKey::context(id))
            .await?
            .unwrap_or_else(|| DEFAULT_CONTEXT.to_string()))
    }

    pub async fn update_context(&self, id: &ConversationId, context: &str) -> Result<()> {
        self.write(&StoreKey::context(id), context).await
    }

    pub async fn window_size(&self, id: &ConversationId) -> Result<usize> {
        Ok(self
            .read(&StoreKey::window_size(id))
            .await?
            .unwrap_or(DEFAULT_WINDOW_SIZE))
    }

    /// Set how many recent turns the model sees. Must be positive; there is
    /// no upper bound.
    pub async fn update_window_size(&self, id: &ConversationId, size: usize) -> Result<()> {
        if size == 0 {
            return Err(ConversationError::InvalidWindowSize(size));
        }
        self.write(&StoreKey::window_size(id), &size).await
    }

    /// Snapshot the full history under `name`. Returns the number of turns saved.
    pub async fn save_checkpoint(&self, id: &ConversationId, name: &str) -> Result<usize> {
        let history = self.full_history(id).await?;
        self.put_checkpoint(id, name, &history).await?;
        Ok(history.len())
    }

    /// Store `messages` as checkpoint `name`.
    pub async fn put_checkpoint(
        &self,
        id: &ConversationId,
        name: &str,
        messages: &[ChatMessage],
    ) -> Result<()> {
        let key = StoreKey::checkpoint(id, name)?;
        self.write(&key, messages).await
    }

    /// `None` when no checkpoint called `name` exists; an empty snapshot is
    /// `Some(vec![])`.
    pub async fn checkpoint(
        &self,
        id: &ConversationId,
        name: &str,
    ) -> Result<Option<Vec<ChatMessage>>> {
        let key = StoreKey::checkpoint(id, name)?;
        self.read(&key).await
    }

    /// Replace the history with checkpoint `name`. Returns the restored turn
    /// count, or `None` if the checkpoint does not exist.
    pub async fn restore_checkpoint(&self, id: &ConversationId, name: &str) -> Result<Option<usize>> {
        let Some(messages) = self.checkpoint(id, name).await? else {
            return Ok(None);
        };
        self.update_history(id, &messages).await?;
        Ok(Some(messages.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::MemoryStore;

    fn setup() -> (ConversationStore<Arc<MemoryStore>>, ConversationId) {
        (
            ConversationStore::new(Arc::new(MemoryStore::new())),
            ConversationId::from(100_i64),
        )
    }

    fn turns(count: usize) -> Vec<ChatMessage> {
        (0..count)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("q{i}"))
                } else {
                    ChatMessage::assistant(format!("a{i}"))
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn new_conversation_has_defaults() {
        let (store, id) = setup();
        assert_eq!(store.context(&id).await.unwrap(), "default");
        assert_eq!(store.window_size(&id).await.unwrap(), 10);
        assert!(store.history(&id).await.unwrap().is_empty());
        assert!(store.full_history(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_is_windowed_to_most_recent() {
        let (store, id) = setup();
        let all = turns(25);
        store.update_history(&id, &all).await.unwrap();

        assert_eq!(store.history(&id).await.unwrap(), all[15..].to_vec());

        store.update_window_size(&id, 3).await.unwrap();
        assert_eq!(store.history(&id).await.unwrap(), all[22..].to_vec());

        store.update_window_size(&id, 100).await.unwrap();
        assert_eq!(store.history(&id).await.unwrap(), all);
        assert_eq!(store.full_history(&id).await.unwrap(), all);
    }

    #[tokio::test]
    async fn zero_window_is_rejected() {
        let (store, id) = setup();
        assert!(matches!(
            store.update_window_size(&id, 0).await,
            Err(ConversationError::InvalidWindowSize(0))
        ));
        assert_eq!(store.window_size(&id).await.unwrap(), DEFAULT_WINDOW_SIZE);
    }

    #[tokio::test]
    async fn checkpoint_captures_full_history() {
        let (store, id) = setup();
        let all = turns(12);
        store.update_history(&id, &all).await.unwrap();
        store.update_window_size(&id, 2).await.unwrap();

        assert_eq!(store.save_checkpoint(&id, "act-one").await.unwrap(), 12);
        store.update_window_size(&id, 4).await.unwrap();
        assert_eq!(store.checkpoint(&id, "act-one").await.unwrap(), Some(all));
    }

    #[tokio::test]
    async fn missing_checkpoint_differs_from_empty() {
        let (store, id) = setup();
        assert_eq!(store.checkpoint(&id, "nope").await.unwrap(), None);

        store.save_checkpoint(&id, "empty").await.unwrap();
        assert_eq!(store.checkpoint(&id, "empty").await.unwrap(), Some(vec![]));
        assert_eq!(store.restore_checkpoint(&id, "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn restore_replaces_history() {
        let (store, id) = setup();
        store.update_history(&id, &turns(2)).await.unwrap();
        store.save_checkpoint(&id, "early").await.unwrap();
        store.update_history(&id, &turns(6)).await.unwrap();

        assert_eq!(store.restore_checkpoint(&id, "early").await.unwrap(), Some(2));
        assert_eq!(store.full_history(&id).await.unwrap(), turns(2));
    }

    #[tokio::test]
    async fn clearing_history_keeps_context_and_window() {
        let (store, id) = setup();
        store.update_context(&id, "a haunted lighthouse").await.unwrap();
        store.update_window_size(&id, 4).await.unwrap();
        store.update_history(&id, &turns(3)).await.unwrap();

        store.clear_history(&id).await.unwrap();

        assert!(store.full_history(&id).await.unwrap().is_empty());
        assert_eq!(store.context(&id).await.unwrap(), "a haunted lighthouse");
        assert_eq!(store.window_size(&id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn reserved_checkpoint_names_are_rejected() {
        let (store, id) = setup();
        assert!(matches!(
            store.save_checkpoint(&id, "history").await,
            Err(ConversationError::Store(StoreError::InvalidCheckpointName(_)))
        ));
    }

    #[tokio::test]
    async fn conversations_do_not_share_state() {
        let (store, id) = setup();
        let other = ConversationId::from(200_i64);
        store.update_context(&id, "desert").await.unwrap();
        store.update_history(&id, &turns(2)).await.unwrap();

        assert_eq!(store.context(&other).await.unwrap(), "default");
        assert!(store.full_history(&other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrongly_shaped_field_is_a_decode_error() {
        let backend = Arc::new(MemoryStore::new());
        let store = ConversationStore::new(Arc::clone(&backend));
        let id = ConversationId::from(100_i64);
        backend
            .set(&StoreKey::window_size(&id), serde_json::json!("ten"))
            .await
            .unwrap();

        assert!(matches!(
            store.window_size(&id).await,
            Err(ConversationError::Store(StoreError::Decode { .. }))
        ));
        // untouched fields still fall back to defaults
        assert_eq!(store.context(&id).await.unwrap(), DEFAULT_CONTEXT);
    }
}
