//! Durable Key-Value Storage
//!
//! The sync engine keeps all of its local state (pending queue, statistics,
//! pull watermark, per-record mirror) in a flat key space behind
//! [`SettingsStore`]. Hosts map it onto whatever they have: SQLite on desktop,
//! UserDefaults/DataStore on mobile, `chrome.storage`/IndexedDB in the browser.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::error::{BridgeError, Result};

/// Key-value storage trait
///
/// Values are typed (string or integer); reading a key with the wrong
/// accessor is a [`BridgeError::TypeMismatch`].
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn remember_watermark(store: &dyn SettingsStore, ts: i64) -> Result<()> {
///     store.set_i64("last_sync_timestamp", ts).await
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store an integer value
    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    /// Retrieve an integer value
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn has_key(&self, key: &str) -> Result<bool>;

    /// List all keys in ascending order
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// List keys starting with `prefix`
    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .list_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    /// Clear all keys
    async fn clear_all(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
enum StoredValue {
    Text(String),
    Integer(i64),
}

impl StoredValue {
    fn type_name(&self) -> &'static str {
        match self {
            StoredValue::Text(_) => "string",
            StoredValue::Integer(_) => "i64",
        }
    }
}

/// In-process [`SettingsStore`].
///
/// Used by hosts without durable storage (ephemeral sessions) and by tests.
/// Writes can be made to fail on demand to exercise persistence error paths.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<BTreeMap<String, StoredValue>>,
    fail_writes: AtomicBool,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with [`BridgeError::Storage`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::Storage(format!("write rejected for key '{}'", key)));
        }
        Ok(())
    }

    fn put(&self, key: &str, value: StoredValue) -> Result<()> {
        self.check_writable(key)?;
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }

    fn fetch(&self, key: &str) -> Option<StoredValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn mismatch(key: &str, expected: &str, actual: &StoredValue) -> BridgeError {
        BridgeError::TypeMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            actual: actual.type_name().to_string(),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, StoredValue::Text(value.to_string()))
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.fetch(key) {
            None => Ok(None),
            Some(StoredValue::Text(value)) => Ok(Some(value)),
            Some(other) => Err(Self::mismatch(key, "string", &other)),
        }
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.put(key, StoredValue::Integer(value))
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.fetch(key) {
            None => Ok(None),
            Some(StoredValue::Integer(value)) => Ok(Some(value)),
            Some(other) => Err(Self::mismatch(key, "i64", &other)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_writable(key)?;
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.fetch(key).is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    async fn clear_all(&self) -> Result<()> {
        self.check_writable("*")?;
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}
