//! In-memory implementation of [`StorageBackend`] for testing.
//!
//! Provides a deterministic, non-persistent backend for unit tests and
//! simulation of the lease lifecycle. It mirrors the behavior of production
//! backends without network or disk I/O.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::storage::StorageBackend;
use super::storage::StorageEntry;
use super::storage::StorageError;

/// In-memory deterministic implementation of [`StorageBackend`].
///
/// Key-value pairs live in a `HashMap` with no persistence, making the store
/// useful where repeatability matters more than durability. Operations are
/// instant and never fail.
#[derive(Default)]
pub struct DeterministicStorageBackend {
    inner: Mutex<HashMap<String, Vec<u8>>>,
}

impl DeterministicStorageBackend {
    /// Create a new empty in-memory backend.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of entries currently stored, across all prefixes.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether the backend holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for DeterministicStorageBackend {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.get(key).map(|value| StorageEntry {
            key: key.to_string(),
            value: value.clone(),
        }))
    }

    async fn put(&self, entry: StorageEntry) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.insert(entry.key, entry.value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.remove(key);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
