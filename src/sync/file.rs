//! Atomic file operations for snapshots.
//!
//! Snapshot flat files are tab-separated text with a single header line.
//! Writes go through a temporary file with fsync before rename, so a crashed
//! export never leaves a truncated file behind. Reads report the exact line
//! of the first malformed record.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};

use crate::channel::TextRow;
use crate::error::{Error, Result};

/// Write content to a file atomically.
///
/// This function:
/// 1. Writes content to a temporary file (same path with `.tmp` extension)
/// 2. Calls `fsync` to ensure data is on disk
/// 3. Atomically renames the temp file to the target path
///
/// If any step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Write to temp file
    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content)?;
        writer.flush()?;
        // Sync to disk before rename
        writer.get_ref().sync_all()?;
    }

    // Atomic rename
    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Serialize rows as tab-separated text and write them atomically.
///
/// Cells are sanitized so the delimiter and record terminators can never
/// appear inside a field, and absent values become empty cells. Identical
/// input always produces identical bytes.
///
/// # Errors
///
/// Returns an error if serialization or any file operation fails.
pub fn write_tsv(path: &Path, columns: &[&str], rows: &[TextRow]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .from_writer(Vec::new());

    writer.write_record(columns)?;
    for row in rows {
        writer.write_record(row.iter().map(|cell| sanitize_cell(cell.as_deref())))?;
    }
    writer.flush()?;

    let content = writer
        .into_inner()
        .map_err(|e| Error::Other(format!("flushing tsv buffer: {e}")))?;
    atomic_write(path, &content)
}

/// Read a tab-separated flat file, returning one row per data line.
///
/// The header line must match `columns` exactly. Empty cells come back as
/// `None`; there is no quoting, so every other byte is carried through
/// verbatim.
///
/// # Errors
///
/// Returns [`Error::LoadFailure`] with the 1-based line number when the
/// header does not match, a record has the wrong number of fields, or a
/// record is not valid UTF-8.
pub fn read_tsv(path: &Path, columns: &[&str]) -> Result<Vec<TextRow>> {
    let file_label = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .has_headers(false)
        .from_path(path)
        .map_err(|e| read_error(&file_label, e))?;

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => record.map_err(|e| read_error(&file_label, e))?,
        None => {
            return Err(Error::LoadFailure {
                file: file_label,
                line: 1,
                message: "missing header line".to_string(),
            });
        }
    };
    if header.len() != columns.len() || header.iter().zip(columns).any(|(got, want)| got != *want)
    {
        return Err(Error::LoadFailure {
            file: file_label,
            line: 1,
            message: format!(
                "header mismatch: expected '{}', got '{}'",
                columns.join("\t"),
                header.iter().collect::<Vec<_>>().join("\t")
            ),
        });
    }

    let mut rows = Vec::new();
    for record in records {
        let record = record.map_err(|e| read_error(&file_label, e))?;
        rows.push(
            record
                .iter()
                .map(|cell| {
                    if cell.is_empty() {
                        None
                    } else {
                        Some(cell.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(rows)
}

/// Collapse bytes that would break the flat-file framing into spaces.
fn sanitize_cell(cell: Option<&str>) -> String {
    match cell {
        Some(text) => text.replace(['\t', '\n', '\r'], " "),
        None => String::new(),
    }
}

fn read_error(file: &str, err: csv::Error) -> Error {
    let line = err.position().map_or(0, csv::Position::line);
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(io) => Error::Io(io),
        _ => Error::LoadFailure {
            file: file.to_string(),
            line,
            message,
        },
    }
}
