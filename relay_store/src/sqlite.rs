use async_trait::async_trait;
use relay_core::{KeyValueStore, StoreError, StoreKey};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS kv (
    conversation TEXT NOT NULL,
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (conversation, name)
)";

/// `SQLite`-backed key-value store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `db_path`.
    pub async fn open(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening database: {}", db_path.display());
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// A private in-memory database. One connection, so every query sees the
    /// same data.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        info!("SqliteStore initialized");
        Ok(Self { pool })
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &StoreKey) -> Result<Value, StoreError> {
        let row = sqlx::query("SELECT value FROM kv WHERE conversation = ? AND name = ?")
            .bind(key.conversation().as_str())
            .bind(key.name())
            .fetch_optional(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;

        let Some(row) = row else {
            return Err(StoreError::NotFound(key.clone()));
        };
        let text: String = row.try_get("value").map_err(anyhow::Error::from)?;
        serde_json::from_str(&text).map_err(|source| StoreError::Decode {
            key: key.clone(),
            source,
        })
    }

    async fn set(&self, key: &StoreKey, value: Value) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO kv (conversation, name, value, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (conversation, name) DO UPDATE
             SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key.conversation().as_str())
        .bind(key.name())
        .bind(value.to_string())
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn delete(&self, key: &StoreKey) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM kv WHERE conversation = ? AND name = ?")
            .bind(key.conversation().as_str())
            .bind(key.name())
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(key.clone()));
        }
        Ok(())
    }
}
