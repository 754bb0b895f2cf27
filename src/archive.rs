//! Image asset archiving.
//!
//! Product images ride along with a snapshot as a single gzip-compressed
//! tarball whose root entry is the image directory itself (`img/...`), the
//! shape a hand-run `tar -czf` from the shop root would produce. Archives
//! are written through a temp file and renamed into place. Restore strips
//! that root entry so the tree lands in the target directory whatever the
//! live directory is called, and rejects entries that would escape it.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::debug;

use crate::error::{Error, Result};

/// Pack `images_dir` into a gzip tarball at `archive_path`.
///
/// The directory's own name becomes the archive's root entry, so the
/// tarball reads naturally outside this tool. Returns the archive size in
/// bytes.
///
/// # Errors
///
/// Returns an error if the directory cannot be walked or the archive
/// cannot be written.
pub fn archive_images(images_dir: &Path, archive_path: &Path) -> Result<u64> {
    if !images_dir.is_dir() {
        return Err(Error::Archive(format!(
            "image directory not found: {}",
            images_dir.display()
        )));
    }
    let root = images_dir.file_name().unwrap_or_else(|| OsStr::new("img"));

    let temp_path = archive_path.with_extension("tmp");
    {
        let file = File::create(&temp_path)?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_dir_all(root, images_dir)
            .map_err(|e| Error::Archive(format!("packing {}: {e}", images_dir.display())))?;

        let encoder = builder
            .into_inner()
            .map_err(|e| Error::Archive(format!("finalizing archive: {e}")))?;
        let writer = encoder
            .finish()
            .map_err(|e| Error::Archive(format!("finalizing archive: {e}")))?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::Archive(format!("flushing archive: {e}")))?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, archive_path)?;

    let size = fs::metadata(archive_path)?.len();
    debug!(
        archive = %archive_path.display(),
        bytes = size,
        "image archive written"
    );
    Ok(size)
}

/// Unpack a gzip tarball into `images_dir`, creating it if needed.
///
/// The archive's root entry is dropped, so the tree is reproduced directly
/// under `images_dir` even when the archived directory had another name.
/// Existing files are overwritten; files not present in the archive are
/// left alone. Only plain files and directories are extracted.
///
/// # Errors
///
/// Returns an error if the archive cannot be read, an entry path would
/// escape the target directory, or an entry cannot be written.
pub fn restore_images(archive_path: &Path, images_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);

    fs::create_dir_all(images_dir)?;
    let entries = archive
        .entries()
        .map_err(|e| Error::Archive(format!("reading {}: {e}", archive_path.display())))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::Archive(format!("reading {}: {e}", archive_path.display())))?;
        let kind = entry.header().entry_type();
        if !kind.is_file() && !kind.is_dir() {
            continue;
        }

        let Some(dest) = strip_root(&entry.path()?, images_dir)? else {
            continue;
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        entry
            .unpack(&dest)
            .map_err(|e| Error::Archive(format!("unpacking {}: {e}", dest.display())))?;
    }
    debug!(target_dir = %images_dir.display(), "image archive restored");
    Ok(())
}

/// Drop an entry path's root component and anchor the rest under `target`.
///
/// Returns `None` for the root entry itself. Anything other than plain
/// name components after the root is refused.
fn strip_root(entry_path: &Path, target: &Path) -> Result<Option<PathBuf>> {
    let mut components = entry_path.components();
    components.next();
    let relative = components.as_path();
    if relative.as_os_str().is_empty() {
        return Ok(None);
    }
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(Error::Archive(format!(
            "archive entry escapes the image tree: {}",
            entry_path.display()
        )));
    }
    Ok(Some(target.join(relative)))
}

/// Hand ownership of a restored tree to the web server user.
///
/// Shells out to `chown -R <owner>:<owner>`; callers treat a failure here
/// as a warning, since the catalog merge has already committed.
///
/// # Errors
///
/// Returns an error if `chown` cannot be spawned or exits non-zero.
pub fn chown_tree(dir: &Path, owner: &str) -> Result<()> {
    let status = Command::new("chown")
        .arg("-R")
        .arg(format!("{owner}:{owner}"))
        .arg(dir)
        .status()?;
    if !status.success() {
        return Err(Error::Archive(format!(
            "chown -R {owner} {} exited with {status}",
            dir.display()
        )));
    }
    Ok(())
}
