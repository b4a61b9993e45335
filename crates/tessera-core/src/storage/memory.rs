//! Non-persistent storage backend.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use super::{Result, StorageBackend};

/// In-memory backend. Data lives as long as the backend does.
#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a table.
    pub fn count(&self, table: &str) -> usize {
        self.data.read().get(table).map(BTreeMap::len).unwrap_or(0)
    }
}

impl StorageBackend for MemoryBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        self.data
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(table).and_then(|t| t.get(key)).cloned())
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let mut data = self.data.write();
        let Some(entries) = data.get_mut(table) else {
            return Ok(false);
        };
        let existed = entries.remove(key).is_some();
        if entries.is_empty() {
            data.remove(table);
        }
        Ok(existed)
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let data = self.data.read();
        Ok(data
            .get(table)
            .map(|entries| {
                entries
                    .range(prefix.to_string()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_basic() {
        let backend = MemoryBackend::new();

        backend.write("ext.a", "key1", b"value1").unwrap();
        assert_eq!(
            backend.read("ext.a", "key1").unwrap(),
            Some(b"value1".to_vec())
        );
        assert_eq!(backend.read("ext.b", "key1").unwrap(), None);

        assert!(backend.delete("ext.a", "key1").unwrap());
        assert!(!backend.delete("ext.a", "key1").unwrap());
        assert_eq!(backend.count("ext.a"), 0);
    }

    #[test]
    fn test_memory_backend_scan_is_sorted_and_prefixed() {
        let backend = MemoryBackend::new();
        backend.write("t", "prefix:b", b"2").unwrap();
        backend.write("t", "prefix:a", b"1").unwrap();
        backend.write("t", "other", b"3").unwrap();

        let results = backend.scan("t", "prefix:").unwrap();
        let keys: Vec<_> = results.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["prefix:a", "prefix:b"]);
        assert_eq!(backend.scan("t", "").unwrap().len(), 3);
        assert!(!backend.is_persistent());
    }
}
