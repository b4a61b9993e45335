//! Extension manifest model and validation.
//!
//! A manifest is the `extension.json` file that sits next to an extension's
//! code artifact. It is pure data: identity, version, dependencies, declared
//! capabilities and the entry point the loader instantiates.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ExtensionStatus;
use crate::error::{Error, Result};

/// File name the discovery scan looks for.
pub const MANIFEST_FILE_NAME: &str = "extension.json";

/// Category of an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExtensionType {
    ProviderIntegration,
    UiComponent,
    MessageProcessor,
    Storage,
    Notification,
    Tool,
    Theme,
    #[default]
    GenericExtension,
}

impl ExtensionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderIntegration => "provider-integration",
            Self::UiComponent => "ui-component",
            Self::MessageProcessor => "message-processor",
            Self::Storage => "storage",
            Self::Notification => "notification",
            Self::Tool => "tool",
            Self::Theme => "theme",
            Self::GenericExtension => "generic-extension",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "provider-integration" => Some(Self::ProviderIntegration),
            "ui-component" => Some(Self::UiComponent),
            "message-processor" => Some(Self::MessageProcessor),
            "storage" => Some(Self::Storage),
            "notification" => Some(Self::Notification),
            "tool" => Some(Self::Tool),
            "theme" => Some(Self::Theme),
            "generic-extension" | "generic" => Some(Self::GenericExtension),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the loader finds the extension's code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EntryPoint {
    /// Artifact path, relative to the manifest directory.
    #[serde(default)]
    pub assembly: String,
    /// Type name to instantiate from the artifact.
    #[serde(default, rename = "type")]
    pub type_name: String,
}

/// A named endpoint an extension exposes through the API gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// UI slot an extension contributes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMountPoint {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_visible")]
    pub default_visible: bool,
}

fn default_visible() -> bool {
    true
}

/// Static description of an extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, rename = "type")]
    pub extension_type: ExtensionType,
    #[serde(default)]
    pub status: ExtensionStatus,
    #[serde(default)]
    pub entry_point: EntryPoint,
    /// Ids this extension requires, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_host_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<serde_json::Value>,
    /// Recorded, not enforced.
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub apis: Vec<ApiDescriptor>,
    #[serde(default)]
    pub ui_mount_points: Vec<UiMountPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Directory the manifest was read from; artifact paths resolve against it.
    ///
    /// Persisted by repositories, overwritten whenever the file is re-read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_dir: Option<PathBuf>,
}

impl Manifest {
    /// Create a manifest with the required fields set.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        entry_point: EntryPoint,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            entry_point,
            ..Default::default()
        }
    }

    pub fn with_type(mut self, extension_type: ExtensionType) -> Self {
        self.extension_type = extension_type;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_minimum_host_version(mut self, version: impl Into<String>) -> Self {
        self.minimum_host_version = Some(version.into());
        self
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    /// Parse a manifest file and remember its directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut manifest: Manifest =
            serde_json::from_str(&raw).map_err(|e| Error::ManifestInvalid {
                id: path.display().to_string(),
                reason: e.to_string(),
            })?;
        manifest.source_dir = path.parent().map(Path::to_path_buf);
        Ok(manifest)
    }

    /// Path of the manifest file this manifest was read from, if any.
    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.source_dir
            .as_ref()
            .map(|dir| dir.join(MANIFEST_FILE_NAME))
    }

    /// Directory artifact paths are resolved against.
    pub fn code_root(&self) -> PathBuf {
        self.source_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Absolute (or code-root relative) path of the entry point artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.code_root().join(&self.entry_point.assembly)
    }

    /// Parsed `version`.
    pub fn parsed_version(&self) -> Result<semver::Version> {
        parse_version(&self.id, "version", &self.version)
    }

    /// Parsed `minimumHostVersion`; `None` when the manifest declares none.
    pub fn parsed_minimum_host_version(&self) -> Result<Option<semver::Version>> {
        self.minimum_host_version
            .as_deref()
            .map(|v| parse_version(&self.id, "minimumHostVersion", v))
            .transpose()
    }

    /// Check the manifest against its code root.
    ///
    /// Checks run in order: required fields, artifact presence, version
    /// syntax, dependency list.
    pub fn validate(&self, code_root: &Path) -> Result<()> {
        let mut missing = Vec::new();
        if self.id.trim().is_empty() {
            missing.push("id");
        }
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.entry_point.assembly.trim().is_empty() {
            missing.push("entryPoint.assembly");
        }
        if self.entry_point.type_name.trim().is_empty() {
            missing.push("entryPoint.type");
        }
        if !missing.is_empty() {
            return Err(self.invalid(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        }

        let artifact = code_root.join(&self.entry_point.assembly);
        if !artifact.is_file() {
            return Err(self.invalid(format!(
                "entry point artifact not found: {}",
                artifact.display()
            )));
        }

        self.parsed_version()?;
        self.parsed_minimum_host_version()?;

        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if dep == &self.id {
                return Err(self.invalid("extension depends on itself"));
            }
            if !seen.insert(dep.as_str()) {
                return Err(self.invalid(format!("dependency '{}' listed twice", dep)));
            }
        }

        Ok(())
    }

    /// Whether `host` satisfies `minimumHostVersion`.
    ///
    /// A malformed minimum is treated as incompatible.
    pub fn is_compatible_with(&self, host: &semver::Version) -> bool {
        match self.parsed_minimum_host_version() {
            Ok(Some(min)) => host >= &min,
            Ok(None) => true,
            Err(_) => false,
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::ManifestInvalid {
            id: if self.id.is_empty() {
                "<unnamed>".to_string()
            } else {
                self.id.clone()
            },
            reason: reason.into(),
        }
    }
}

fn parse_version(id: &str, field: &'static str, value: &str) -> Result<semver::Version> {
    semver::Version::parse(value.trim()).map_err(|e| Error::MalformedVersion {
        id: id.to_string(),
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
