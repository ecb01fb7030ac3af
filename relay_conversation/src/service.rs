//! Command surface shared by every front-end.

use relay_core::{CompletionClient, ConversationId, KeyValueStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use crate::completion::{CompletionPolicy, ResilientCompletion, TurnOutcome};
use crate::error::Result;
use crate::store::{ConversationStore, LATEST_CHECKPOINT};

/// Result of `load` and `undo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLoad {
    Restored { messages: usize },
    NotFound,
}

/// One mutex per conversation, created on first use.
///
/// Entries nobody holds or waits on are dropped on the next `acquire`, so
/// the map only grows with the number of conversations active at once.
#[derive(Default)]
pub struct ConversationLocks {
    locks: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`. The lock is released when the
    /// guard drops.
    pub async fn acquire(&self, id: &ConversationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // clones are only made under the map lock, so a count of one
            // means idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}

pub struct ConversationService<S = Arc<dyn KeyValueStore>, C = Arc<dyn CompletionClient>> {
    store: ConversationStore<S>,
    completion: ResilientCompletion<S, C>,
    locks: ConversationLocks,
}

impl<S, C> ConversationService<S, C>
where
    S: KeyValueStore + Clone,
    C: CompletionClient,
{
    pub fn new(store: S, client: C, policy: CompletionPolicy) -> Self {
        let store = ConversationStore::new(store);
        Self {
            completion: ResilientCompletion::new(store.clone(), client, policy),
            store,
            locks: ConversationLocks::new(),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &ConversationStore<S> {
        &self.store
    }

    #[must_use]
    pub const fn policy(&self) -> &CompletionPolicy {
        self.completion.policy()
    }

    pub async fn set_context(&self, id: &ConversationId, context: &str) -> Result<()> {
        let _guard = self.locks.acquire(id).await;
        self.store.update_context(id, context).await?;
        info!("[{id}] Context set ({} chars)", context.chars().count());
        Ok(())
    }

    pub async fn context(&self, id: &ConversationId) -> Result<String> {
        self.store.context(id).await
    }

    pub async fn set_window_size(&self, id: &ConversationId, size: usize) -> Result<()> {
        let _guard = self.locks.acquire(id).await;
        self.store.update_window_size(id, size).await?;
        info!("[{id}] Window size set to {size}");
        Ok(())
    }

    /// One chat turn. Always yields text: the reply or the failure reply.
    pub async fn chat(&self, id: &ConversationId, message: &str) -> String {
        self.respond(id, message)
            .await
            .into_text(&self.policy().failure_reply)
    }

    /// Like [`Self::chat`], but keeps the outcome for callers that log it.
    pub async fn respond(&self, id: &ConversationId, message: &str) -> TurnOutcome {
        let _guard = self.locks.acquire(id).await;
        self.completion.respond(id, message).await
    }

    /// The windowed history as pretty-printed JSON.
    pub async fn history_json(&self, id: &ConversationId) -> Result<String> {
        let history = self.store.history(id).await?;
        Ok(serde_json::to_string_pretty(&history)?)
    }

    /// Returns the number of turns saved.
    pub async fn save_checkpoint(&self, id: &ConversationId, name: &str) -> Result<usize> {
        let _guard = self.locks.acquire(id).await;
        let saved = self.store.save_checkpoint(id, name).await?;
        info!("[{id}] Saved checkpoint {name:?} with {saved} messages");
        Ok(saved)
    }

    pub async fn load_checkpoint(&self, id: &ConversationId, name: &str) -> Result<CheckpointLoad> {
        let _guard = self.locks.acquire(id).await;
        let loaded = match self.store.restore_checkpoint(id, name).await? {
            Some(messages) => CheckpointLoad::Restored { messages },
            None => CheckpointLoad::NotFound,
        };
        info!("[{id}] Load checkpoint {name:?}: {loaded:?}");
        Ok(loaded)
    }

    /// Roll back to the history as it was before the last chat turn.
    pub async fn undo(&self, id: &ConversationId) -> Result<CheckpointLoad> {
        self.load_checkpoint(id, LATEST_CHECKPOINT).await
    }

    pub async fn clear_history(&self, id: &ConversationId) -> Result<()> {
        let _guard = self.locks.acquire(id).await;
        self.store.clear_history(id).await?;
        info!("[{id}] History cleared");
        Ok(())
    }
}
