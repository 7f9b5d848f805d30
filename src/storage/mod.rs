// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

pub mod cache_store;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use cache_store::{CacheSnapshot, CacheStore, CURRENT_SCHEMA_VERSION};
pub use memory::InMemoryKvStore;
pub use sqlite::SqliteKvStore;
pub use traits::{KvStore, StorageError};
