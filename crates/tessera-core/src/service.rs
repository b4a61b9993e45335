//! Host-facing extension management.
//!
//! [`ExtensionService`] is what a web layer or CLI talks to. It combines the
//! [`ExtensionManager`] (live state) with an [`ExtensionRepository`]
//! (what is installed and how it was left) and reports failures as
//! [`OperationError`]s with a reason fit for end users.

use std::sync::Arc;

use serde::Serialize;

use crate::error::Error;
use crate::extension::manager::{BatchReport, ExtensionManager};
use crate::extension::manifest::{ExtensionType, Manifest};
use crate::extension::state::{ExtensionState, ExtensionStatus};
use crate::repository::ExtensionRepository;

/// Failure of a management operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{operation} of '{extension_id}' failed: {reason}")]
pub struct OperationError {
    pub operation: &'static str,
    pub extension_id: String,
    pub reason: String,
}

impl OperationError {
    fn new(operation: &'static str, extension_id: &str, error: &Error) -> Self {
        Self {
            operation,
            extension_id: extension_id.to_string(),
            reason: error.reason(),
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, OperationError>;

/// Installed extension with its live state.
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionSummary {
    pub manifest: Manifest,
    pub state: ExtensionState,
    /// Most recent failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Management surface over a manager and a repository.
pub struct ExtensionService {
    manager: Arc<ExtensionManager>,
    repository: Arc<dyn ExtensionRepository>,
}

impl ExtensionService {
    pub fn new(manager: Arc<ExtensionManager>, repository: Arc<dyn ExtensionRepository>) -> Self {
        Self {
            manager,
            repository,
        }
    }

    pub fn manager(&self) -> &Arc<ExtensionManager> {
        &self.manager
    }

    pub fn repository(&self) -> &Arc<dyn ExtensionRepository> {
        &self.repository
    }

    /// Every installed extension, ordered by id.
    pub async fn list_installed(&self) -> ServiceResult<Vec<ExtensionSummary>> {
        let records = self
            .repository
            .get_all()
            .await
            .map_err(|e| OperationError::new("list", "*", &e))?;
        Ok(records.into_iter().map(|m| self.summary(m)).collect())
    }

    pub async fn get(&self, id: &str) -> ServiceResult<ExtensionSummary> {
        self.installed("get", id).await.map(|m| self.summary(m))
    }

    pub async fn list_by_type(&self, extension_type: ExtensionType) -> ServiceResult<Vec<ExtensionSummary>> {
        let records = self
            .repository
            .get_by_type(extension_type)
            .await
            .map_err(|e| OperationError::new("list", "*", &e))?;
        Ok(records.into_iter().map(|m| self.summary(m)).collect())
    }

    pub async fn list_by_status(&self, status: ExtensionStatus) -> ServiceResult<Vec<ExtensionSummary>> {
        let records = self
            .repository
            .get_by_status(status)
            .await
            .map_err(|e| OperationError::new("list", "*", &e))?;
        Ok(records.into_iter().map(|m| self.summary(m)).collect())
    }

    /// Record a discovered extension as installed and load it.
    pub async fn install(&self, id: &str) -> ServiceResult<ExtensionSummary> {
        const OP: &str = "install";
        let manifest = self
            .manager
            .manifest(id)
            .await
            .ok_or_else(|| OperationError::new(OP, id, &Error::ManifestNotFound(id.to_string())))?;

        let mut record = (*manifest).clone();
        record.status = ExtensionStatus::Installed;
        let saved = self
            .repository
            .save(&record)
            .await
            .map_err(|e| OperationError::new(OP, id, &e))?;

        let loaded = self.manager.load_extension(id).await;
        self.finish(OP, id, loaded).await?;
        tracing::info!(extension_id = %id, "Extension installed");
        Ok(self.summary(Manifest {
            status: self.manager.state(id).status(),
            ..saved
        }))
    }

    /// Load if needed, then enable.
    pub async fn enable(&self, id: &str) -> ServiceResult<()> {
        const OP: &str = "enable";
        self.installed(OP, id).await?;
        let result = match self.manager.load_extension(id).await {
            Ok(()) => self.manager.enable_extension(id).await,
            Err(e) => Err(e),
        };
        self.finish(OP, id, result).await
    }

    pub async fn disable(&self, id: &str) -> ServiceResult<()> {
        const OP: &str = "disable";
        self.installed(OP, id).await?;
        let result = self.manager.disable_extension(id).await;
        self.finish(OP, id, result).await
    }

    pub async fn reload(&self, id: &str) -> ServiceResult<()> {
        const OP: &str = "reload";
        self.installed(OP, id).await?;
        let result = self.manager.reload_extension(id).await;
        self.finish(OP, id, result).await
    }

    /// Disable, unload and forget an extension.
    pub async fn uninstall(&self, id: &str) -> ServiceResult<()> {
        const OP: &str = "uninstall";
        self.installed(OP, id).await?;
        if let Err(e) = self.manager.unload_extension(id).await {
            // A failed dispose still unloads; anything else blocks removal.
            if self.manager.is_loaded(id).await {
                return Err(OperationError::new(OP, id, &e));
            }
        }
        self.repository
            .delete(id)
            .await
            .map_err(|e| OperationError::new(OP, id, &e))?;
        tracing::info!(extension_id = %id, "Extension uninstalled");
        Ok(())
    }

    /// Bring back what was running before the host stopped.
    ///
    /// Persisted manifests unknown to the manager are registered first.
    /// Extensions persisted as `enabled` are loaded and enabled in
    /// dependency order; those persisted as `loaded` or `disabled` are
    /// loaded. Failures are isolated per extension.
    pub async fn restore(&self) -> BatchReport {
        let mut report = BatchReport::default();
        let records = match self.repository.get_all().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Cannot read installed extensions");
                report.failed.push(("*".to_string(), e));
                return report;
            }
        };

        let mut to_enable = Vec::new();
        let mut to_load = Vec::new();
        for record in records {
            let id = record.id.clone();
            if self.manager.manifest(&id).await.is_none() {
                if let Err(e) = self.manager.register_manifest(record.clone()).await {
                    tracing::warn!(extension_id = %id, error = %e, "Installed extension is no longer valid");
                    self.set_status(&id, ExtensionStatus::Error).await;
                    report.failed.push((id, e));
                    continue;
                }
            }
            match record.status {
                ExtensionStatus::Enabled => to_enable.push(id),
                ExtensionStatus::Loaded | ExtensionStatus::Disabled => to_load.push(id),
                ExtensionStatus::Installed | ExtensionStatus::Error => {}
            }
        }

        let enabled = self.manager.enable_all(&to_enable).await;
        for id in &to_load {
            let result = self.manager.load_extension(id).await;
            report.record(id, result);
        }
        report.succeeded.extend(enabled.succeeded);
        report.failed.extend(enabled.failed);

        for id in &report.succeeded {
            self.set_status(id, self.manager.state(id).status()).await;
        }
        for (id, _) in &report.failed {
            self.set_status(id, ExtensionStatus::Error).await;
        }
        tracing::info!(
            restored = report.succeeded.len(),
            failed = report.failed.len(),
            "Installed extensions restored"
        );
        report
    }

    async fn installed(&self, operation: &'static str, id: &str) -> ServiceResult<Manifest> {
        match self.repository.get_by_id(id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(OperationError::new(
                operation,
                id,
                &Error::ManifestNotFound(id.to_string()),
            )),
            Err(e) => Err(OperationError::new(operation, id, &e)),
        }
    }

    /// Persist the outcome of a lifecycle call.
    async fn finish(&self, operation: &'static str, id: &str, result: crate::Result<()>) -> ServiceResult<()> {
        match result {
            Ok(()) => {
                self.set_status(id, self.manager.state(id).status()).await;
                Ok(())
            }
            Err(e) => {
                // Refusals leave the extension as it was; faults mark it failed.
                let status = match self.manager.state(id) {
                    ExtensionState::Error => ExtensionStatus::Error,
                    _ if e.is_lifecycle_fault() => ExtensionStatus::Error,
                    state => state.status(),
                };
                self.set_status(id, status).await;
                Err(OperationError::new(operation, id, &e))
            }
        }
    }

    async fn set_status(&self, id: &str, status: ExtensionStatus) {
        if let Err(e) = self.repository.update_status(id, status).await {
            tracing::warn!(extension_id = %id, error = %e, "Failed to persist extension status");
        }
    }

    fn summary(&self, manifest: Manifest) -> ExtensionSummary {
        ExtensionSummary {
            state: self.manager.state(&manifest.id),
            last_error: self.manager.last_error(&manifest.id),
            manifest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_error_display() {
        let err = OperationError::new(
            "enable",
            "tool.echo",
            &Error::DependencyNotEnabled {
                id: "tool.echo".into(),
                dependency: "core.log".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "enable of 'tool.echo' failed: dependency 'core.log' is not enabled"
        );
    }
}
