//! Manifest discovery on the filesystem.
//!
//! A search location either holds an `extension.json` itself or contains
//! one extension per immediate subdirectory.

use std::path::{Path, PathBuf};

use super::manifest::{Manifest, MANIFEST_FILE_NAME};
use crate::error::Result;

/// Manifest files under one search location, in directory-name order.
pub fn manifest_files(location: &Path) -> Vec<PathBuf> {
    let direct = location.join(MANIFEST_FILE_NAME);
    if direct.is_file() {
        return vec![direct];
    }

    let entries = match std::fs::read_dir(location) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                location = %location.display(),
                error = %e,
                "Failed to read extension search location"
            );
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    dirs.into_iter()
        .map(|dir| dir.join(MANIFEST_FILE_NAME))
        .filter(|path| path.is_file())
        .collect()
}

/// Parse a manifest file and validate it against its own directory.
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let manifest = Manifest::from_file(path)?;
    manifest.validate(&manifest.code_root())?;
    Ok(manifest)
}

/// Scan one location, logging and skipping manifests that fail to parse or
/// validate.
pub fn scan_location(location: &Path) -> Vec<Manifest> {
    manifest_files(location)
        .into_iter()
        .filter_map(|path| match read_manifest(&path) {
            Ok(manifest) => {
                tracing::debug!(
                    extension_id = %manifest.id,
                    path = %path.display(),
                    "Discovered extension"
                );
                Some(manifest)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping extension manifest");
                None
            }
        })
        .collect()
}
