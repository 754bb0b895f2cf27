//! Database channel abstraction.
//!
//! All SQL traffic flows through one [`DbChannel`] trait object, resolved once
//! per invocation and passed explicitly through the call chain. Two
//! implementations share the contract:
//!
//! - [`direct::DirectChannel`] — a network client connection
//! - [`docker::DockerChannel`] — statements issued through `docker exec` into
//!   the database container
//!
//! Reads go through [`DbChannel::query_rows`]; all mutation goes through
//! [`DbChannel::run_transaction`], which executes an ordered step list as one
//! indivisible unit of work.

pub mod direct;
pub mod docker;
pub mod resolve;

use crate::error::Result;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// How the database is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ConnectionMode {
    /// Probe for a containerized stack first, fall back to direct.
    #[default]
    Auto,
    /// Network client using discovered or supplied connection parameters.
    Direct,
    /// Command channel into the database container.
    Indirect,
}

impl ConnectionMode {
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::Auto => "auto",
            Self::Direct => "direct",
            Self::Indirect => "indirect",
        }
    }
}

/// One row of a text-protocol result set; `None` is SQL NULL.
pub type TextRow = Vec<Option<String>>;

/// A bulk load of one staging table from a validated snapshot file.
///
/// Carries both the source file (shipped to the server-side loader in
/// indirect mode) and the parsed rows (inserted with a parameterized batch
/// in direct mode); both views hold exactly the same data.
pub struct TableLoad {
    pub table: String,
    pub columns: &'static [&'static str],
    pub path: PathBuf,
    pub rows: Vec<TextRow>,
}

impl fmt::Debug for TableLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableLoad")
            .field("table", &self.table)
            .field("path", &self.path)
            .field("rows", &self.rows.len())
            .finish()
    }
}

/// One step of a transactional script.
#[derive(Debug)]
pub enum TxStep {
    /// A single SQL statement, executed as-is.
    Statement(String),
    /// A staging-table bulk load.
    Load(TableLoad),
}

impl TxStep {
    /// One-line rendering for plan previews and debug logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Statement(sql) => sql.split_whitespace().collect::<Vec<_>>().join(" "),
            Self::Load(load) => format!(
                "LOAD {} -> {} ({} rows)",
                load.path.display(),
                load.table,
                load.rows.len()
            ),
        }
    }
}

/// The polymorphic database channel.
///
/// Resolved once by [`resolve::resolve_channel`]; everything downstream takes
/// `&mut dyn DbChannel` and stays mode-agnostic.
#[async_trait]
pub trait DbChannel: Send {
    /// The mode this channel implements (never `Auto`).
    fn mode(&self) -> ConnectionMode;

    /// Run a read query and return all rows as nullable text cells.
    async fn query_rows(&mut self, sql: &str) -> Result<Vec<TextRow>>;

    /// Execute the step list as one transaction.
    ///
    /// Referential-integrity checks are suspended for the duration and
    /// restored regardless of outcome. Any step failure aborts the whole
    /// unit; nothing is committed.
    async fn run_transaction(&mut self, steps: Vec<TxStep>) -> Result<()>;

    /// Release the underlying connection, if any.
    async fn close(&mut self) -> Result<()>;
}

/// First cell of the first row, for scalar lookups.
#[must_use]
pub fn scalar(rows: &[TextRow]) -> Option<String> {
    rows.first().and_then(|row| row.first()).and_then(Clone::clone)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned-response channel for exporter/importer/introspector tests.

    use super::{ConnectionMode, DbChannel, TextRow, TxStep};
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Replays queued result sets and records everything it was asked to do.
    pub struct StubChannel {
        pub results: VecDeque<Vec<TextRow>>,
        pub queries: Vec<String>,
        pub transactions: Vec<Vec<TxStep>>,
        pub fail_transaction: bool,
    }

    impl StubChannel {
        pub fn new() -> Self {
            Self {
                results: VecDeque::new(),
                queries: Vec::new(),
                transactions: Vec::new(),
                fail_transaction: false,
            }
        }

        pub fn push_result(&mut self, rows: Vec<TextRow>) {
            self.results.push_back(rows);
        }
    }

    impl Default for StubChannel {
        fn default() -> Self {
            Self::new()
        }
    }

    pub fn row(cells: &[Option<&str>]) -> TextRow {
        cells.iter().map(|c| c.map(str::to_string)).collect()
    }

    #[async_trait]
    impl DbChannel for StubChannel {
        fn mode(&self) -> ConnectionMode {
            ConnectionMode::Direct
        }

        async fn query_rows(&mut self, sql: &str) -> Result<Vec<TextRow>> {
            self.queries.push(sql.to_string());
            Ok(self.results.pop_front().unwrap_or_default())
        }

        async fn run_transaction(&mut self, steps: Vec<TxStep>) -> Result<()> {
            if self.fail_transaction {
                return Err(Error::Channel("simulated statement failure".into()));
            }
            self.transactions.push(steps);
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_takes_first_cell() {
        let rows = vec![
            vec![Some("7".to_string()), Some("x".to_string())],
            vec![Some("9".to_string())],
        ];
        assert_eq!(scalar(&rows), Some("7".to_string()));
        assert_eq!(scalar(&[]), None);
        assert_eq!(scalar(&[vec![None]]), None);
    }

    #[test]
    fn test_describe_flattens_statements() {
        let step = TxStep::Statement("UPDATE t\n  SET a = 1\n  WHERE b = 2".to_string());
        assert_eq!(step.describe(), "UPDATE t SET a = 1 WHERE b = 2");
    }

    #[test]
    fn test_describe_load_counts_rows() {
        let step = TxStep::Load(TableLoad {
            table: "stg_products".into(),
            columns: &["id_product"],
            path: PathBuf::from("/snap/products.tsv"),
            rows: vec![vec![Some("1".into())], vec![Some("2".into())]],
        });
        assert!(step.describe().contains("stg_products"));
        assert!(step.describe().contains("2 rows"));
    }
}
