//! Installed extension records.
//!
//! Persists manifests and their last known status so installed extensions
//! survive host restarts.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use tessera_core::repository::{stamp_for_save, ExtensionRepository};
use tessera_core::{ExtensionStatus, Manifest};

use crate::backends::open_database;
use crate::error::{Error, Result};

// key = extension id, value = manifest JSON
const EXTENSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("extensions");

/// redb-backed [`ExtensionRepository`].
///
/// Calls run on the blocking pool; records are stored as JSON so the
/// manifest model can grow fields without a migration.
#[derive(Clone)]
pub struct RedbExtensionRepository {
    db: Arc<Database>,
}

impl RedbExtensionRepository {
    /// Open or create the repository at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_database(open_database(path.as_ref(), true)?)
    }

    /// Use an already opened database (shared with a [`crate::RedbBackend`]).
    pub fn from_database(db: Arc<Database>) -> Result<Self> {
        let store = Self { db };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(EXTENSIONS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<Manifest>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EXTENSIONS_TABLE)?;
        let record = match table.get(id)? {
            Some(data) => Some(serde_json::from_slice(data.value())?),
            None => None,
        };
        Ok(record)
    }

    fn load_all(&self) -> Result<Vec<Manifest>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EXTENSIONS_TABLE)?;

        let mut records = Vec::new();
        for result in table.iter()? {
            let (key, data) = result?;
            match serde_json::from_slice::<Manifest>(data.value()) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        extension_id = %key.value(),
                        error = %e,
                        "Skipping unreadable extension record"
                    );
                }
            }
        }
        Ok(records)
    }

    fn store(&self, manifest: &Manifest) -> Result<Manifest> {
        if manifest.id.trim().is_empty() {
            return Err(Error::InvalidInput("extension id cannot be empty".into()));
        }

        let write_txn = self.db.begin_write()?;
        let record = {
            let mut table = write_txn.open_table(EXTENSIONS_TABLE)?;
            let existing = match table.get(manifest.id.as_str())? {
                Some(data) => serde_json::from_slice::<Manifest>(data.value()).ok(),
                None => None,
            };
            let record = stamp_for_save(manifest, existing.as_ref());
            let value = serde_json::to_vec(&record)?;
            table.insert(record.id.as_str(), value.as_slice())?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    fn set_status(&self, id: &str, status: ExtensionStatus) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(EXTENSIONS_TABLE)?;
            let current = match table.get(id)? {
                Some(data) => Some(serde_json::from_slice::<Manifest>(data.value())?),
                None => None,
            };
            match current {
                Some(mut record) => {
                    record.status = status;
                    record.updated_at = Some(Utc::now());
                    let value = serde_json::to_vec(&record)?;
                    table.insert(id, value.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(EXTENSIONS_TABLE)?;
            let removed = table.remove(id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    async fn blocking<T, F>(&self, f: F) -> tessera_core::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        let result = tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(Error::from)?;
        Ok(result?)
    }
}

#[async_trait]
impl ExtensionRepository for RedbExtensionRepository {
    async fn get_all(&self) -> tessera_core::Result<Vec<Manifest>> {
        self.blocking(|s| s.load_all()).await
    }

    async fn get_by_id(&self, id: &str) -> tessera_core::Result<Option<Manifest>> {
        let id = id.to_string();
        self.blocking(move |s| s.load(&id)).await
    }

    async fn save(&self, manifest: &Manifest) -> tessera_core::Result<Manifest> {
        let manifest = manifest.clone();
        let saved = self.blocking(move |s| s.store(&manifest)).await?;
        tracing::debug!(extension_id = %saved.id, "Extension record saved");
        Ok(saved)
    }

    async fn update_status(&self, id: &str, status: ExtensionStatus) -> tessera_core::Result<bool> {
        let id = id.to_string();
        self.blocking(move |s| s.set_status(&id, status)).await
    }

    async fn delete(&self, id: &str) -> tessera_core::Result<bool> {
        let id = id.to_string();
        self.blocking(move |s| s.remove(&id)).await
    }
}
