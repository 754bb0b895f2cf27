//! Snapshot directory layout and integrity manifest.
//!
//! A snapshot is a plain directory holding the five catalog flat files,
//! optionally an image archive, and a small JSON manifest recording SHA256
//! digests of everything written. The manifest is advisory: a snapshot
//! without one imports fine, but when present it is verified before any
//! database work starts.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::schema::SchemaContext;
use crate::sync::atomic_write;
use crate::sync::{ENTITIES, EntityCounts};

/// Manifest file name inside a snapshot directory.
pub const MANIFEST_FILE: &str = "snapshot.json";

/// Image archive file name inside a snapshot directory.
pub const ARCHIVE_FILE: &str = "images.tar.gz";

/// Current manifest format version.
pub const MANIFEST_FORMAT: u32 = 1;

/// Default directory name for a new snapshot.
#[must_use]
pub fn default_dir_name(now: DateTime<Utc>) -> String {
    format!("snapshot-{}", now.format("%Y%m%d-%H%M%S"))
}

/// Check that a directory contains every required flat file.
///
/// # Errors
///
/// Returns [`Error::IncompleteSnapshot`] listing the missing file names.
pub fn validate_dir(dir: &Path) -> Result<()> {
    let missing: Vec<String> = ENTITIES
        .iter()
        .filter(|spec| !dir.join(spec.file_name).is_file())
        .map(|spec| spec.file_name.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::IncompleteSnapshot {
            dir: dir.to_path_buf(),
            missing,
        })
    }
}

/// SHA256 digest of a file's content as lowercase hex.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Snapshot manifest: provenance plus per-file digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version.
    pub format: u32,
    /// Version of the tool that wrote the snapshot.
    #[serde(default)]
    pub version: String,
    /// When the snapshot was written.
    pub created_at: DateTime<Utc>,
    /// Connection target the snapshot was exported from (no credentials).
    pub target: String,
    /// Schema context the export ran under.
    pub context: SchemaContext,
    /// Rows written per entity.
    pub counts: EntityCounts,
    /// File name to SHA256 hex digest, for every file in the snapshot.
    pub files: BTreeMap<String, String>,
}

impl Manifest {
    /// Build a manifest for a freshly written snapshot directory.
    ///
    /// Digests every entity flat file plus the image archive when one
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if any snapshot file cannot be read.
    pub fn build(
        dir: &Path,
        target: &str,
        context: &SchemaContext,
        counts: EntityCounts,
    ) -> Result<Self> {
        let mut files = BTreeMap::new();
        for spec in &ENTITIES {
            files.insert(
                spec.file_name.to_string(),
                file_digest(&dir.join(spec.file_name))?,
            );
        }
        let archive = dir.join(ARCHIVE_FILE);
        if archive.is_file() {
            files.insert(ARCHIVE_FILE.to_string(), file_digest(&archive)?);
        }

        Ok(Self {
            format: MANIFEST_FORMAT,
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            target: target.to_string(),
            context: context.clone(),
            counts,
            files,
        })
    }

    /// Path of the manifest inside `dir`.
    #[must_use]
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }
}

/// Write the manifest atomically as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<()> {
    let mut content = serde_json::to_vec_pretty(manifest)?;
    content.push(b'\n');
    atomic_write(&Manifest::path_in(dir), &content)
}

/// Read the manifest if one exists.
///
/// # Errors
///
/// Returns [`Error::SnapshotCorrupt`] if a manifest is present but cannot
/// be parsed.
pub fn read_manifest(dir: &Path) -> Result<Option<Manifest>> {
    let path = Manifest::path_in(dir);
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    match serde_json::from_str(&content) {
        Ok(manifest) => Ok(Some(manifest)),
        Err(e) => {
            tracing::debug!("unreadable manifest at {}: {e}", path.display());
            Err(Error::SnapshotCorrupt {
                file: MANIFEST_FILE.to_string(),
            })
        }
    }
}

/// Verify every file the manifest lists against its recorded digest.
///
/// # Errors
///
/// Returns [`Error::SnapshotCorrupt`] naming the first file that is absent
/// or whose content changed since export.
pub fn verify_manifest(dir: &Path, manifest: &Manifest) -> Result<()> {
    for (name, recorded) in &manifest.files {
        let path = dir.join(name);
        if !path.is_file() {
            return Err(Error::SnapshotCorrupt { file: name.clone() });
        }
        let actual = file_digest(&path)?;
        if actual != *recorded {
            return Err(Error::SnapshotCorrupt { file: name.clone() });
        }
    }
    Ok(())
}
