//! Redb storage backend implementation.
//!
//! Every extension table lives in one redb table under namespaced keys
//! (`{len}:table:key`), so adding an extension never needs a schema change.
//! The length prefix keeps namespaces apart even when table names contain
//! the separator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, TableDefinition};
use tessera_core::storage::{Result as CoreResult, StorageBackend};

use crate::error::Result;

// Format: "{table_name.len()}:table_name:key"
const UNIFIED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("unified_storage");

/// Configuration for [`RedbBackend`].
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RedbBackendConfig {
    /// Path to the database file.
    pub path: PathBuf,

    /// Create parent directories if they don't exist.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,
}

fn default_create_dirs() -> bool {
    true
}

impl RedbBackendConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
        }
    }

    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }
}

/// Open `path`, creating the file (and optionally its parent directory).
///
/// redb holds an exclusive lock on the file, so one process should open it
/// once and share the handle between the backend and the repository.
pub fn open_database(path: &Path, create_dirs: bool) -> Result<Arc<Database>> {
    if create_dirs {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = if path.exists() {
        Database::open(path)?
    } else {
        Database::create(path)?
    };
    tracing::debug!(path = %path.display(), "Opened redb database");
    Ok(Arc::new(db))
}

fn table_prefix(table: &str) -> String {
    format!("{}:{}:", table.len(), table)
}

fn make_key(table: &str, key: &str) -> String {
    let mut result = table_prefix(table);
    result.push_str(key);
    result
}

/// redb-based persistent storage backend.
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbBackend {
    pub fn new(config: RedbBackendConfig) -> Result<Self> {
        let db = open_database(&config.path, config.create_dirs)?;
        Ok(Self::from_database(db, config.path))
    }

    /// Open or create a backend at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(RedbBackendConfig::new(path.as_ref()))
    }

    /// Use an already opened database.
    pub fn from_database(db: Arc<Database>, path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn put(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        let namespaced = make_key(table, key);
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(UNIFIED_TABLE)?;
            t.insert(namespaced.as_str(), value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let namespaced = make_key(table, key);
        let txn = self.db.begin_read()?;
        let t = match txn.open_table(UNIFIED_TABLE) {
            Ok(t) => t,
            // Nothing has been written yet.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = t.get(namespaced.as_str())?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn remove(&self, table: &str, key: &str) -> Result<bool> {
        let namespaced = make_key(table, key);
        let txn = self.db.begin_write()?;
        let removed = {
            let mut t = txn.open_table(UNIFIED_TABLE)?;
            let existed = t.remove(namespaced.as_str())?.is_some();
            existed
        };
        txn.commit()?;
        Ok(removed)
    }

    fn prefix_scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let start = make_key(table, prefix);
        let table_prefix_len = table_prefix(table).len();

        let txn = self.db.begin_read()?;
        let t = match txn.open_table(UNIFIED_TABLE) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        // Keys are ordered, so the matches form one contiguous run.
        let mut results = Vec::new();
        for item in t.range(start.as_str()..)? {
            let (key, value) = item?;
            let key_str = key.value();
            if !key_str.starts_with(&start) {
                break;
            }
            if let Some(rest) = key_str.get(table_prefix_len..) {
                results.push((rest.to_string(), value.value().to_vec()));
            }
        }
        Ok(results)
    }
}

impl StorageBackend for RedbBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> CoreResult<()> {
        Ok(self.put(table, key, value)?)
    }

    fn read(&self, table: &str, key: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.get(table, key)?)
    }

    fn delete(&self, table: &str, key: &str) -> CoreResult<bool> {
        Ok(self.remove(table, key)?)
    }

    fn scan(&self, table: &str, prefix: &str) -> CoreResult<Vec<(String, Vec<u8>)>> {
        Ok(self.prefix_scan(table, prefix)?)
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = RedbBackendConfig::new("./data/test.redb").with_create_dirs(false);
        assert_eq!(config.path, PathBuf::from("./data/test.redb"));
        assert!(!config.create_dirs);
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: RedbBackendConfig =
            serde_json::from_value(serde_json::json!({ "path": "db.redb" })).unwrap();
        assert!(config.create_dirs);
    }

    #[test]
    fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("nested/store.redb")).unwrap();

        assert_eq!(backend.read("ext", "k").unwrap(), None);
        backend.write("ext", "k", b"v").unwrap();
        assert_eq!(backend.read("ext", "k").unwrap(), Some(b"v".to_vec()));
        assert!(backend.delete("ext", "k").unwrap());
        assert!(!backend.delete("ext", "k").unwrap());
        assert!(backend.is_persistent());
    }

    #[test]
    fn test_scan_stays_inside_table() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("store.redb")).unwrap();

        backend.write("a", "x:1", b"1").unwrap();
        backend.write("a", "x:2", b"2").unwrap();
        backend.write("a", "y", b"3").unwrap();
        backend.write("ab", "x:9", b"9").unwrap();

        let keys: Vec<_> = backend
            .scan("a", "x")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["x:1", "x:2"]);
        assert_eq!(backend.scan("a", "").unwrap().len(), 3);
        assert!(backend.scan("missing", "").unwrap().is_empty());
    }

    #[test]
    fn test_keys_do_not_collide_across_tables() {
        assert_ne!(make_key("a:b", "c"), make_key("a", "b:c"));

        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("store.redb")).unwrap();
        backend.write("a:b", "c", b"inner").unwrap();

        assert_eq!(backend.read("a", "b:c").unwrap(), None);
        assert!(backend.scan("a", "").unwrap().is_empty());
        assert!(!backend.delete("a", "b:c").unwrap());
        assert_eq!(backend.read("a:b", "c").unwrap(), Some(b"inner".to_vec()));
    }
}
