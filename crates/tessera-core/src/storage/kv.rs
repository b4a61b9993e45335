use std::fmt::Debug;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Result, StorageBackend, StorageError};

/// How a value ended up in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Serialized to JSON; typed reads work.
    Structured,
    /// Serialization failed; the `Debug` rendering was stored instead.
    Opaque,
}

/// A stored value with its encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "value", rename_all = "snake_case")]
pub enum StoredValue {
    Structured(serde_json::Value),
    Opaque(Vec<u8>),
}

impl StoredValue {
    pub fn encoding(&self) -> Encoding {
        match self {
            Self::Structured(_) => Encoding::Structured,
            Self::Opaque(_) => Encoding::Opaque,
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Typed key-value store shared by all extensions.
///
/// Every entry is addressed by `(extension_id, key)`; one extension's keys
/// never collide with another's.
pub struct ExtensionStorage {
    backend: Arc<dyn StorageBackend>,
}

impl ExtensionStorage {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// In-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(super::MemoryBackend::new()))
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }

    /// Store `value`, falling back to its `Debug` text if it cannot be
    /// serialized.
    pub fn set<T>(&self, extension_id: &str, key: &str, value: &T) -> Result<Encoding>
    where
        T: Serialize + Debug + ?Sized,
    {
        let stored = match serde_json::to_value(value) {
            Ok(json) => StoredValue::Structured(json),
            Err(e) => {
                tracing::warn!(
                    extension_id = %extension_id,
                    key = %key,
                    error = %e,
                    "Value is not serializable, storing it opaquely"
                );
                StoredValue::Opaque(format!("{:?}", value).into_bytes())
            }
        };
        self.backend
            .write(extension_id, key, &stored.to_bytes()?)?;
        Ok(stored.encoding())
    }

    /// Typed read. Absent or undecodable values yield `T::default()`.
    pub fn get<T>(&self, extension_id: &str, key: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        match self.try_get(extension_id, key) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                tracing::debug!(
                    extension_id = %extension_id,
                    key = %key,
                    error = %e,
                    "Falling back to default value"
                );
                T::default()
            }
        }
    }

    /// Typed read that reports decoding problems.
    pub fn try_get<T>(&self, extension_id: &str, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get_raw(extension_id, key)? {
            None => Ok(None),
            Some(StoredValue::Structured(json)) => serde_json::from_value(json)
                .map(Some)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            Some(StoredValue::Opaque(_)) => Err(StorageError::Serialization(format!(
                "'{}' was stored opaquely and cannot be decoded",
                key
            ))),
        }
    }

    pub fn get_raw(&self, extension_id: &str, key: &str) -> Result<Option<StoredValue>> {
        self.backend
            .read(extension_id, key)?
            .map(|bytes| StoredValue::from_bytes(&bytes))
            .transpose()
    }

    /// Remove a key. Returns whether it existed.
    pub fn remove(&self, extension_id: &str, key: &str) -> Result<bool> {
        self.backend.delete(extension_id, key)
    }

    pub fn exists(&self, extension_id: &str, key: &str) -> Result<bool> {
        Ok(self.backend.read(extension_id, key)?.is_some())
    }

    /// Keys of one extension, sorted.
    pub fn list_keys(&self, extension_id: &str) -> Result<Vec<String>> {
        Ok(self
            .backend
            .scan(extension_id, "")?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    /// Delete every key of one extension. Returns how many were removed.
    pub fn clear(&self, extension_id: &str) -> Result<usize> {
        let keys = self.list_keys(extension_id)?;
        let mut removed = 0;
        for key in keys {
            if self.backend.delete(extension_id, &key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl Default for ExtensionStorage {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// [`ExtensionStorage`] bound to a single extension id.
#[derive(Clone)]
pub struct ScopedStorage {
    extension_id: String,
    inner: Arc<ExtensionStorage>,
}

impl ScopedStorage {
    pub fn new(extension_id: impl Into<String>, inner: Arc<ExtensionStorage>) -> Self {
        Self {
            extension_id: extension_id.into(),
            inner,
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub fn set<T: Serialize + Debug + ?Sized>(&self, key: &str, value: &T) -> Result<Encoding> {
        self.inner.set(&self.extension_id, key, value)
    }

    pub fn get<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.inner.get(&self.extension_id, key)
    }

    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.inner.try_get(&self.extension_id, key)
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<StoredValue>> {
        self.inner.get_raw(&self.extension_id, key)
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        self.inner.remove(&self.extension_id, key)
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(&self.extension_id, key)
    }

    pub fn list_keys(&self) -> Result<Vec<String>> {
        self.inner.list_keys(&self.extension_id)
    }

    pub fn clear(&self) -> Result<usize> {
        self.inner.clear(&self.extension_id)
    }
}
