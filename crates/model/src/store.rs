//! Desired-state store contract
//!
//! The daemon persists the specs it applied through this trait. Writes are
//! deduplicated on a content hash unless forced; keys behave like paths, so a
//! prefix names a directory.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

/// Root of every key written by the daemon
pub const ROOT_KEY: &str = "/lain/deployd";
/// Directory holding applied pod-group specs
pub const POD_GROUP_KEY: &str = "pod_groups";

/// Errors returned by a [`Store`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Key absent
    #[error("no such key: {0}")]
    NoSuchKey(String),

    /// A directory was used where a value was expected, or vice versa
    #[error("wrong node type at {0}")]
    WrongNodeType(String),

    /// Value (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Key/value store backing desired state
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Read the raw value at `key`.
    async fn get(&self, key: &str) -> Result<String, StoreError>;

    /// Write `value` at `key`; skipped when the content hash is unchanged
    /// unless `force` is set.
    async fn set(&self, key: &str, value: String, force: bool) -> Result<(), StoreError>;

    /// Delete a single key.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Every key under the directory `prefix`.
    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Recursively delete the directory `key`.
    async fn remove_dir(&self, key: &str) -> Result<(), StoreError>;
}

/// Key of the applied spec of one pod group
#[must_use]
pub fn pod_group_key(namespace: &str, name: &str) -> String {
    format!("{ROOT_KEY}/{POD_GROUP_KEY}/{namespace}/{name}")
}

/// Read and decode a JSON value.
///
/// # Errors
///
/// Propagates store errors and decoding failures.
pub async fn get_json<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Result<T, StoreError> {
    let raw = store.get(key).await?;
    Ok(serde_json::from_str(&raw)?)
}

/// Encode and write a JSON value.
///
/// # Errors
///
/// Propagates store errors and encoding failures.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn Store,
    key: &str,
    value: &T,
    force: bool,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, raw, force).await
}

fn content_hash(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn dir_prefix(key: &str) -> String {
    format!("{}/", key.trim_end_matches('/'))
}

/// In-memory [`Store`] used by the daemon's local mode and by tests
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<BTreeMap<String, String>>>,
    key_hashes: Arc<Mutex<HashMap<String, u64>>>,
    writes: Arc<Mutex<u64>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes that actually reached the backing map
    #[must_use]
    pub fn write_count(&self) -> u64 {
        *lock(&self.writes)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A poisoned map is still structurally valid
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let values = lock(&self.values);
        if let Some(v) = values.get(key) {
            return Ok(v.clone());
        }
        let prefix = dir_prefix(key);
        if values.keys().any(|k| k.starts_with(&prefix)) {
            return Err(StoreError::WrongNodeType(key.to_string()));
        }
        Err(StoreError::NoSuchKey(key.to_string()))
    }

    async fn set(&self, key: &str, value: String, force: bool) -> Result<(), StoreError> {
        let hash = content_hash(&value);
        let mut hashes = lock(&self.key_hashes);
        if !force && hashes.get(key) == Some(&hash) {
            debug!("Skipping unchanged write to {}", key);
            return Ok(());
        }
        lock(&self.values).insert(key.to_string(), value);
        hashes.insert(key.to_string(), hash);
        *lock(&self.writes) += 1;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.values).remove(key);
        lock(&self.key_hashes).remove(key);
        Ok(())
    }

    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let values = lock(&self.values);
        if values.contains_key(prefix) {
            return Err(StoreError::WrongNodeType(prefix.to_string()));
        }
        let dir = dir_prefix(prefix);
        let keys: Vec<String> = values.keys().filter(|k| k.starts_with(&dir)).cloned().collect();
        if keys.is_empty() {
            return Err(StoreError::NoSuchKey(prefix.to_string()));
        }
        Ok(keys)
    }

    async fn remove_dir(&self, key: &str) -> Result<(), StoreError> {
        let dir = dir_prefix(key);
        let mut hashes = lock(&self.key_hashes);
        let mut values = lock(&self.values);
        values.retain(|k, _| !k.starts_with(&dir) && k != key);
        hashes.retain(|k, _| !k.starts_with(&dir) && k != key);
        Ok(())
    }
}
