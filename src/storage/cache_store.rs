// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-user persisted snapshot.
//!
//! A [`CacheStore`] is bound to exactly one user for its lifetime and owns a
//! single key, `{prefix}:{user_id}`, in the underlying [`KvStore`].
//!
//! # Envelope
//!
//! ```json
//! {
//!   "schema_version": 1,
//!   "owner_user_id": "u1",
//!   "last_sync_timestamp": "2026-04-01T08:00:00Z",
//!   "checksum": "<hex sha-256 of payload>",
//!   "payload": "[{\"id\":\"t1\", ...}]"
//! }
//! ```
//!
//! The ticket list is stored as an embedded JSON string so the checksum is
//! computed over the exact bytes that were written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::{KvStore, StorageError};
use crate::error::SyncError;
use crate::metrics;
use crate::ticket::{sort_tickets, Ticket};

/// Version of the persisted envelope. Bump on any incompatible change to
/// [`Ticket`] or the envelope itself; older snapshots are then discarded.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// The complete set of cached tickets for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub tickets: Vec<Ticket>,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub owner_user_id: String,
    pub schema_version: u32,
}

impl CacheSnapshot {
    #[must_use]
    pub fn empty(owner_user_id: impl Into<String>, schema_version: u32) -> Self {
        Self {
            tickets: Vec::new(),
            last_sync_timestamp: None,
            owner_user_id: owner_user_id.into(),
            schema_version,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Ticket> {
        self.tickets.iter().find(|t| t.id == id)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    schema_version: u32,
    owner_user_id: String,
    last_sync_timestamp: Option<DateTime<Utc>>,
    checksum: String,
    payload: String,
}

/// Reads only the version so an incompatible layout is never fully decoded.
#[derive(Deserialize)]
struct SchemaHeader {
    #[serde(default)]
    schema_version: Option<u32>,
}

/// Hex SHA-256 of a serialized ticket list.
#[must_use]
pub fn checksum(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

pub struct CacheStore {
    kv: Arc<dyn KvStore>,
    user_id: String,
    key: String,
    schema_version: u32,
}

impl CacheStore {
    pub fn new(
        kv: Arc<dyn KvStore>,
        user_id: impl Into<String>,
        schema_version: u32,
        key_prefix: &str,
    ) -> Self {
        let user_id = user_id.into();
        let key = format!("{}:{}", key_prefix, user_id);
        Self {
            kv,
            user_id,
            key,
            schema_version,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Load the persisted snapshot.
    ///
    /// `Ok(None)` for a cold start: nothing stored, a different schema
    /// version, or a snapshot owned by someone else. Unreadable or corrupted
    /// data is [`SyncError::CacheRead`].
    pub async fn load(&self) -> Result<Option<CacheSnapshot>, SyncError> {
        let raw = match self.kv.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => return Err(SyncError::CacheRead(e.to_string())),
        };

        let header: SchemaHeader = serde_json::from_str(&raw)
            .map_err(|e| SyncError::CacheRead(StorageError::from(e).to_string()))?;
        if header.schema_version != Some(self.schema_version) {
            debug!(
                user_id = %self.user_id,
                found = ?header.schema_version,
                expected = self.schema_version,
                "Schema version mismatch, treating cache as absent"
            );
            metrics::record_cache_discarded("schema_mismatch");
            return Ok(None);
        }

        let envelope: Envelope = serde_json::from_str(&raw)
            .map_err(|e| SyncError::CacheRead(StorageError::from(e).to_string()))?;

        let actual = checksum(&envelope.payload);
        if actual != envelope.checksum {
            let err = StorageError::Corruption {
                key: self.key.clone(),
                expected: envelope.checksum,
                actual,
            };
            return Err(SyncError::CacheRead(err.to_string()));
        }

        if envelope.owner_user_id != self.user_id {
            warn!(
                user_id = %self.user_id,
                owner = %envelope.owner_user_id,
                "Persisted snapshot belongs to another user, ignoring"
            );
            metrics::record_cache_discarded("owner_mismatch");
            return Ok(None);
        }

        let tickets: Vec<Ticket> = serde_json::from_str(&envelope.payload)
            .map_err(|e| SyncError::CacheRead(StorageError::from(e).to_string()))?;

        Ok(Some(CacheSnapshot {
            tickets,
            last_sync_timestamp: envelope.last_sync_timestamp,
            owner_user_id: envelope.owner_user_id,
            schema_version: envelope.schema_version,
        }))
    }

    /// [`load`](Self::load), with read errors logged and degraded to absent.
    pub async fn load_or_absent(&self) -> Option<CacheSnapshot> {
        match self.load().await {
            Ok(snapshot) => {
                metrics::record_persistence("load", true);
                snapshot
            }
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Cache read failed, starting empty");
                metrics::record_persistence("load", false);
                metrics::record_error(e.kind().as_str());
                None
            }
        }
    }

    /// Persist a snapshot, recomputing its ordering first.
    pub async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), SyncError> {
        if snapshot.owner_user_id != self.user_id {
            return Err(SyncError::CacheWrite(format!(
                "snapshot owned by '{}' cannot be written for '{}'",
                snapshot.owner_user_id, self.user_id
            )));
        }

        let mut tickets = snapshot.tickets.clone();
        sort_tickets(&mut tickets);

        let payload = serde_json::to_string(&tickets)
            .map_err(|e| SyncError::CacheWrite(StorageError::from(e).to_string()))?;
        let envelope = Envelope {
            schema_version: self.schema_version,
            owner_user_id: self.user_id.clone(),
            last_sync_timestamp: snapshot.last_sync_timestamp,
            checksum: checksum(&payload),
            payload,
        };
        let raw = serde_json::to_string(&envelope)
            .map_err(|e| SyncError::CacheWrite(StorageError::from(e).to_string()))?;

        self.kv
            .put(&self.key, &raw)
            .await
            .map_err(|e| SyncError::CacheWrite(e.to_string()))?;

        debug!(user_id = %self.user_id, tickets = tickets.len(), "Snapshot saved");
        Ok(())
    }

    /// Delete the persisted snapshot.
    pub async fn clear(&self) -> Result<(), SyncError> {
        self.kv
            .delete(&self.key)
            .await
            .map_err(|e| SyncError::CacheWrite(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKvStore;
    use crate::ticket::fixtures::{at, interurban, urban};
    use serde_json::json;

    fn store_for(kv: &Arc<InMemoryKvStore>, user: &str) -> CacheStore {
        CacheStore::new(kv.clone(), user, CURRENT_SCHEMA_VERSION, "ticket_cache")
    }

    fn snapshot(owner: &str) -> CacheSnapshot {
        let mut older = urban("t1", "BRT");
        older.core.validated_at = Some(at("2026-04-01T08:00:00Z"));
        let mut newer = interurban("t2");
        if let crate::ticket::Trip::Interurban(trip) = &mut newer.trip {
            trip.departure_at = Some(at("2026-05-01T08:00:00Z"));
        }
        CacheSnapshot {
            // deliberately unsorted
            tickets: vec![older, newer],
            last_sync_timestamp: Some(at("2026-04-01T09:00:00Z")),
            owner_user_id: owner.to_string(),
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }

    #[tokio::test]
    async fn test_save_then_load_sorted() {
        let kv = Arc::new(InMemoryKvStore::new());
        let store = store_for(&kv, "u1");
        assert_eq!(store.key(), "ticket_cache:u1");

        store.save(&snapshot("u1")).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();

        let ids: Vec<_> = loaded.tickets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t1"]);
        assert_eq!(loaded.owner_user_id, "u1");
        assert_eq!(loaded.last_sync_timestamp, Some(at("2026-04-01T09:00:00Z")));
    }

    #[tokio::test]
    async fn test_missing_is_absent() {
        let kv = Arc::new(InMemoryKvStore::new());
        assert!(store_for(&kv, "u1").load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_absent_not_error() {
        let kv = Arc::new(InMemoryKvStore::new());
        store_for(&kv, "u1").save(&snapshot("u1")).await.unwrap();

        let newer = CacheStore::new(kv.clone(), "u1", CURRENT_SCHEMA_VERSION + 1, "ticket_cache");
        assert!(newer.load().await.unwrap().is_none());

        // A layout from before versioning existed decodes to no version at all.
        kv.put("ticket_cache:u2", &json!({ "tickets": [] }).to_string()).await.unwrap();
        assert!(store_for(&kv, "u2").load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_read_error() {
        let kv = Arc::new(InMemoryKvStore::new());
        let store = store_for(&kv, "u1");
        store.save(&snapshot("u1")).await.unwrap();

        let raw = kv.get("ticket_cache:u1").await.unwrap().unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        value["payload"] = json!("[]");
        kv.put("ticket_cache:u1", &value.to_string()).await.unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, SyncError::CacheRead(_)));
        assert!(store.load_or_absent().await.is_none());
    }

    #[tokio::test]
    async fn test_garbage_is_read_error() {
        let kv = Arc::new(InMemoryKvStore::new());
        kv.put("ticket_cache:u1", "not json").await.unwrap();
        assert!(matches!(store_for(&kv, "u1").load().await, Err(SyncError::CacheRead(_))));
    }

    #[tokio::test]
    async fn test_foreign_owner_is_absent() {
        let kv = Arc::new(InMemoryKvStore::new());
        store_for(&kv, "u1").save(&snapshot("u1")).await.unwrap();

        // Same key, different binding: simulate a copied key.
        let raw = kv.get("ticket_cache:u1").await.unwrap().unwrap();
        kv.put("ticket_cache:u2", &raw).await.unwrap();

        assert!(store_for(&kv, "u2").load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_refuses_foreign_snapshot() {
        let kv = Arc::new(InMemoryKvStore::new());
        let err = store_for(&kv, "u1").save(&snapshot("u2")).await.unwrap_err();
        assert!(matches!(err, SyncError::CacheWrite(_)));
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_only_own_key() {
        let kv = Arc::new(InMemoryKvStore::new());
        store_for(&kv, "u1").save(&snapshot("u1")).await.unwrap();
        store_for(&kv, "u2").save(&snapshot("u2")).await.unwrap();

        store_for(&kv, "u1").clear().await.unwrap();

        assert!(store_for(&kv, "u1").load().await.unwrap().is_none());
        assert!(store_for(&kv, "u2").load().await.unwrap().is_some());
    }
}
