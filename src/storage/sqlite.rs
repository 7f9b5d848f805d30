// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed [`KvStore`].
//!
//! ```sql
//! CREATE TABLE kv_store (
//!     key TEXT PRIMARY KEY,        -- "{prefix}:{user_id}"
//!     value TEXT NOT NULL,         -- Serialized snapshot envelope
//!     updated_at INTEGER NOT NULL  -- Unix timestamp of the last write
//! );
//! ```

use async_trait::async_trait;
use sqlx::{AnyPool, Row, any::AnyPoolOptions};
use std::time::Duration;
use tracing::debug;

use super::traits::{KvStore, StorageError};

pub struct SqliteKvStore {
    pool: AnyPool,
}

impl SqliteKvStore {
    /// Open (creating if needed) the database file at `sqlite_path`.
    pub async fn open(sqlite_path: &str) -> Result<Self, StorageError> {
        sqlx::any::install_default_drivers();

        let url = format!("sqlite://{}?mode=rwc", sqlite_path);

        let pool = AnyPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&url)
            .await
            .map_err(|e| StorageError::Backend(format!(
                "Failed to open ticket cache DB: {}", e
            )))?;

        let store = Self { pool };
        store.init_schema().await?;

        debug!(path = sqlite_path, "Ticket cache DB ready");
        Ok(store)
    }

    /// Share an existing pool. The table is created if missing.
    pub async fn from_pool(pool: AnyPool) -> Result<Self, StorageError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#
        )
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!(
                "Failed to create kv_store table: {}", e
            )))?;

        Ok(())
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to read '{}': {}", key, e)))?;

        match row {
            Some(row) => {
                let value: String = row.try_get("value")
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#
        )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to write '{}': {}", key, e)))?;

        debug!(key, bytes = value.len(), "Snapshot persisted");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to delete '{}': {}", key, e)))?;

        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // substr() instead of LIKE so '%' and '_' in user ids match literally.
        let rows = sqlx::query(
            "SELECT key FROM kv_store WHERE substr(key, 1, ?) = ? ORDER BY key"
        )
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to scan keys: {}", e)))?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("key").map_err(|e| StorageError::Backend(e.to_string())))
            .collect()
    }
}
