//! Persistence boundary for installed extensions.
//!
//! The runtime records which extensions are installed and their last known
//! status through [`ExtensionRepository`]. `tessera-storage` provides a
//! redb implementation; [`InMemoryExtensionRepository`] serves tests and
//! hosts that do not persist anything.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::extension::manifest::{ExtensionType, Manifest};
use crate::extension::state::ExtensionStatus;

/// Storage of installed manifests and their status.
#[async_trait]
pub trait ExtensionRepository: Send + Sync {
    /// All records, ordered by id.
    async fn get_all(&self) -> Result<Vec<Manifest>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Manifest>>;

    /// Insert or replace a record. Stamps `updated_at`, and `created_at` on
    /// first insert (an existing creation time is preserved). Returns the
    /// stored record.
    async fn save(&self, manifest: &Manifest) -> Result<Manifest>;

    /// Set the status of an existing record. Returns `false` if absent.
    async fn update_status(&self, id: &str, status: ExtensionStatus) -> Result<bool>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn exists_by_id(&self, id: &str) -> Result<bool> {
        Ok(self.get_by_id(id).await?.is_some())
    }

    async fn get_by_type(&self, extension_type: ExtensionType) -> Result<Vec<Manifest>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|m| m.extension_type == extension_type)
            .collect())
    }

    async fn get_by_status(&self, status: ExtensionStatus) -> Result<Vec<Manifest>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|m| m.status == status)
            .collect())
    }
}

/// Apply the timestamp rules of [`ExtensionRepository::save`].
pub fn stamp_for_save(manifest: &Manifest, existing: Option<&Manifest>) -> Manifest {
    let now = Utc::now();
    let mut record = manifest.clone();
    record.created_at = existing
        .and_then(|e| e.created_at)
        .or(manifest.created_at)
        .or(Some(now));
    record.updated_at = Some(now);
    record
}

/// Non-persistent repository.
#[derive(Default)]
pub struct InMemoryExtensionRepository {
    records: RwLock<BTreeMap<String, Manifest>>,
}

impl InMemoryExtensionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExtensionRepository for InMemoryExtensionRepository {
    async fn get_all(&self) -> Result<Vec<Manifest>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Manifest>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn save(&self, manifest: &Manifest) -> Result<Manifest> {
        let mut records = self.records.write().await;
        let record = stamp_for_save(manifest, records.get(&manifest.id));
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_status(&self, id: &str, status: ExtensionStatus) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(record) => {
                record.status = status;
                record.updated_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn exists_by_id(&self, id: &str) -> Result<bool> {
        Ok(self.records.read().await.contains_key(id))
    }
}
