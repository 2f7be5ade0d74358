//! Storage seam: a hierarchical key-value backend and prefix-scoped views.
//!
//! Keys are `/`-separated hierarchical paths. A [`View`] scopes every
//! operation under a fixed prefix so a subsystem can be handed a slice of the
//! keyspace without being able to reach outside it. Views nest: the
//! expiration manager lives under `expire/` within the enclosing system view
//! and opens further sub-views for prefix scans.

use std::sync::Arc;

use async_trait::async_trait;
use snafu::Snafu;

/// Failures surfaced by [`StorageBackend`] operations.
#[derive(Debug, Snafu)]
pub enum StorageError {
    /// The backend failed to execute the operation.
    #[snafu(display("storage backend failure: {message}"))]
    Backend {
        /// Backend-provided failure description.
        message: String,
    },
}

/// A single key-value pair held by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    /// Full hierarchical key.
    pub key: String,
    /// Opaque value bytes.
    pub value: Vec<u8>,
}

/// Durable key-value storage consumed through [`View`]s.
///
/// The backend does no caching and imposes no ordering on listings; callers
/// that care about order must sort.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch the entry at `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>, StorageError>;

    /// Store an entry, overwriting any existing value at its key.
    async fn put(&self, entry: StorageEntry) -> Result<(), StorageError>;

    /// Delete the entry at `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List the full keys of every entry under `prefix`, recursively, in
    /// unspecified order.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// A prefix-scoped window onto a [`StorageBackend`].
///
/// All keys passed to a view are relative to its root; the view prepends its
/// prefix before touching the backend and strips it from listings.
#[derive(Clone)]
pub struct View {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
}

impl View {
    /// Create a view rooted at `prefix`. A missing trailing `/` is appended
    /// so that sibling prefixes can never alias each other.
    pub fn new(backend: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: normalize_prefix(prefix.into()),
        }
    }

    /// Open a nested view scoped under `prefix` relative to this view.
    pub fn sub_view(&self, prefix: &str) -> View {
        View {
            backend: Arc::clone(&self.backend),
            prefix: format!("{}{}", self.prefix, normalize_prefix(prefix.to_string())),
        }
    }

    /// Fetch the entry at `key` relative to the view root. The returned
    /// entry's key is relative as well.
    pub async fn get(&self, key: &str) -> Result<Option<StorageEntry>, StorageError> {
        let full = format!("{}{}", self.prefix, key);
        let entry = self.backend.get(&full).await?;
        Ok(entry.map(|entry| StorageEntry {
            key: key.to_string(),
            value: entry.value,
        }))
    }

    /// Store an entry whose key is relative to the view root.
    pub async fn put(&self, entry: StorageEntry) -> Result<(), StorageError> {
        self.backend
            .put(StorageEntry {
                key: format!("{}{}", self.prefix, entry.key),
                value: entry.value,
            })
            .await
    }

    /// Delete the entry at `key` relative to the view root.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let full = format!("{}{}", self.prefix, key);
        self.backend.delete(&full).await
    }

    /// Collect every key under the view, recursively, relative to its root.
    /// Order is unspecified.
    pub async fn collect_keys(&self) -> Result<Vec<String>, StorageError> {
        let keys = self.backend.list_prefix(&self.prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }
}

fn normalize_prefix(mut prefix: String) -> String {
    if !prefix.is_empty() && !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::super::inmemory::DeterministicStorageBackend;
    use super::*;

    fn entry(key: &str, value: &str) -> StorageEntry {
        StorageEntry {
            key: key.to_string(),
            value: value.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn view_scopes_keys_under_prefix() {
        let backend = DeterministicStorageBackend::new();
        let view = View::new(backend.clone(), "expire/");

        view.put(entry("aws/creds/a", "one")).await.unwrap();

        let raw = backend.get("expire/aws/creds/a").await.unwrap().unwrap();
        assert_eq!(raw.value, b"one");

        let scoped = view.get("aws/creds/a").await.unwrap().unwrap();
        assert_eq!(scoped.key, "aws/creds/a");
    }

    #[tokio::test]
    async fn sub_view_nests_prefixes() {
        let backend = DeterministicStorageBackend::new();
        let view = View::new(backend.clone(), "expire/");
        let sub = view.sub_view("aws/creds");

        sub.put(entry("a", "one")).await.unwrap();

        assert!(
            backend
                .get("expire/aws/creds/a")
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(view.get("aws/creds/a").await.unwrap().unwrap().value, b"one");
    }

    #[tokio::test]
    async fn collect_keys_is_relative_and_recursive() {
        let backend = DeterministicStorageBackend::new();
        let view = View::new(backend.clone(), "expire/");

        view.put(entry("aws/creds/a", "one")).await.unwrap();
        view.put(entry("aws/creds/b", "two")).await.unwrap();
        view.put(entry("pg/creds/c", "three")).await.unwrap();
        backend.put(entry("other/x", "outside")).await.unwrap();

        let mut keys = view.collect_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["aws/creds/a", "aws/creds/b", "pg/creds/c"]);

        let mut sub_keys = view.sub_view("aws/creds/").collect_keys().await.unwrap();
        sub_keys.sort();
        assert_eq!(sub_keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = DeterministicStorageBackend::new();
        let view = View::new(backend, "expire/");

        view.put(entry("k", "v")).await.unwrap();
        view.delete("k").await.unwrap();
        view.delete("k").await.unwrap();
        assert!(view.get("k").await.unwrap().is_none());
    }
}
