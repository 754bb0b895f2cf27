//! Error types for the catsync CLI.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=database, 3=service, 4=config, etc.)
//! - Retryability flags for callers that can correct their input
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for catsync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database / channel (exit 2)
    DatabaseError,
    ChannelError,

    // Service discovery (exit 3)
    ServiceNotFound,

    // Configuration (exit 4)
    ConfigNotFound,
    InvalidArgument,

    // Schema context (exit 5)
    SchemaContextMissing,

    // Snapshot (exit 6)
    IncompleteSnapshot,
    SnapshotCorrupt,

    // Bulk load (exit 7)
    LoadFailure,

    // I/O (exit 8)
    IoError,
    JsonError,
    ArchiveError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::DatabaseError => "DATABASE_ERROR",
            Self::ChannelError => "CHANNEL_ERROR",
            Self::ServiceNotFound => "SERVICE_NOT_FOUND",
            Self::ConfigNotFound => "CONFIG_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::SchemaContextMissing => "SCHEMA_CONTEXT_MISSING",
            Self::IncompleteSnapshot => "INCOMPLETE_SNAPSHOT",
            Self::SnapshotCorrupt => "SNAPSHOT_CORRUPT",
            Self::LoadFailure => "LOAD_FAILURE",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::ArchiveError => "ARCHIVE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::DatabaseError | Self::ChannelError => 2,
            Self::ServiceNotFound => 3,
            Self::ConfigNotFound | Self::InvalidArgument => 4,
            Self::SchemaContextMissing => 5,
            Self::IncompleteSnapshot | Self::SnapshotCorrupt => 6,
            Self::LoadFailure => 7,
            Self::IoError | Self::JsonError | Self::ArchiveError => 8,
        }
    }

    /// Whether the caller can retry after correcting its input.
    ///
    /// True when an override or a fixed snapshot makes the same invocation
    /// succeed. False for connectivity, I/O, or internal errors: those are
    /// surfaced once and never retried automatically.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound
                | Self::InvalidArgument
                | Self::SchemaContextMissing
                | Self::IncompleteSnapshot
                | Self::SnapshotCorrupt
                | Self::LoadFailure
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in catsync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Service not running: {service}")]
    ServiceNotFound { service: String },

    #[error("No database configuration found")]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Schema context missing: {what}")]
    SchemaContextMissing { what: String },

    #[error("Incomplete snapshot at {}: missing {}", dir.display(), missing.join(", "))]
    IncompleteSnapshot { dir: PathBuf, missing: Vec<String> },

    #[error("Snapshot file {file} failed its integrity check")]
    SnapshotCorrupt { file: String },

    #[error("Malformed row in {file} line {line}: {message}")]
    LoadFailure {
        file: String,
        line: u64,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] mysql_async::Error),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot file error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::ServiceNotFound { .. } => ErrorCode::ServiceNotFound,
            Self::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Self::SchemaContextMissing { .. } => ErrorCode::SchemaContextMissing,
            Self::IncompleteSnapshot { .. } => ErrorCode::IncompleteSnapshot,
            Self::SnapshotCorrupt { .. } => ErrorCode::SnapshotCorrupt,
            Self::LoadFailure { .. } => ErrorCode::LoadFailure,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Channel(_) => ErrorCode::ChannelError,
            Self::Archive(_) => ErrorCode::ArchiveError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Io(_) | Self::Csv(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint for humans and scripts.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::ServiceNotFound { service } => Some(format!(
                "Container '{service}' is not running. Check `docker ps`, \
                 pass --app-service/--db-service with the right names, \
                 or force --mode direct."
            )),

            Self::ConfigNotFound { searched } => {
                let mut hint = String::from("No parseable connection layout was found.\n");
                if !searched.is_empty() {
                    hint.push_str("  Probed:\n");
                    for path in searched {
                        hint.push_str(&format!("    {}\n", path.display()));
                    }
                }
                hint.push_str(
                    "  Point --shop-root at the store installation, or supply\n  \
                     --db-host, --db-user, --db-password and --db-name explicitly.",
                );
                Some(hint)
            }

            Self::SchemaContextMissing { what } => Some(format!(
                "Could not read {what} from the live schema. \
                 Supply it explicitly (e.g. --lang-id 1) or check --prefix."
            )),

            Self::IncompleteSnapshot { .. } => Some(
                "Point the import at a directory produced by `catsync export`; \
                 all five .tsv files must be present."
                    .to_string(),
            ),

            Self::SnapshotCorrupt { file } => Some(format!(
                "'{file}' changed since the snapshot was written. \
                 Re-export, or remove snapshot.json to skip verification."
            )),

            Self::LoadFailure { .. } => {
                Some("Fix the offending row or re-export the snapshot.".to_string())
            }

            Self::Database(_)
            | Self::Channel(_)
            | Self::Archive(_)
            | Self::InvalidArgument(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Csv(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
