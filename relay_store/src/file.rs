use anyhow::Context;
use async_trait::async_trait;
use relay_core::{KeyValueStore, StoreError, StoreKey};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

/// Filesystem-backed key-value store.
///
/// Layout: `<root>/<conversation>/<name>.json`. Writes land in a sibling
/// temporary file first and are renamed into place, so a reader never sees
/// a half-written value.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub async fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create store directory {}", root.display()))?;
        debug!("FileStore rooted at {}", root.display());
        Ok(Self { root })
    }

    fn conversation_dir(&self, key: &StoreKey) -> PathBuf {
        self.root.join(key.conversation().as_str())
    }

    fn path_for(&self, key: &StoreKey) -> PathBuf {
        self.conversation_dir(key).join(format!("{}.json", key.name()))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &StoreKey) -> Result<Value, StoreError> {
        let path = self.path_for(key);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.clone()));
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read {}", path.display()))
                    .into());
            }
        };
        serde_json::from_str(&text).map_err(|source| StoreError::Decode {
            key: key.clone(),
            source,
        })
    }

    async fn set(&self, key: &StoreKey, value: Value) -> Result<(), StoreError> {
        let dir = self.conversation_dir(key);
        let path = self.path_for(key);
        let tmp = dir.join(format!(".{}.json.tmp", key.name()));
        let body = serde_json::to_vec(&value).map_err(|source| StoreError::Decode {
            key: key.clone(),
            source,
        })?;

        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move value into {}", path.display()))?;

        debug!("Stored {key}");
        Ok(())
    }

    async fn delete(&self, key: &StoreKey) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.clone())),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to delete {}", path.display()))
                .into()),
        }
    }
}
