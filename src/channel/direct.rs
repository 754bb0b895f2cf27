//! Direct network channel.
//!
//! Holds one client connection for the whole invocation; the import
//! transaction and the staging tables live on this session.

use crate::channel::{ConnectionMode, DbChannel, TableLoad, TextRow, TxStep};
use crate::config::DbParams;
use crate::error::{Error, Result};

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Value};

pub struct DirectChannel {
    conn: Option<Conn>,
}

impl DirectChannel {
    /// Open a connection using fully-resolved parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] when the server refuses the connection or
    /// the credentials.
    pub async fn connect(params: &DbParams) -> Result<Self> {
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(params.host.clone())
            .tcp_port(params.port)
            .user(Some(params.user.clone()))
            .pass(Some(params.password.clone()))
            .db_name(Some(params.database.clone()))
            .into();

        tracing::debug!(target_db = %params.describe(), "connecting");
        let conn = Conn::new(opts).await?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Channel("connection already closed".into()))
    }

    async fn run_steps(&mut self, steps: &[TxStep]) -> Result<()> {
        self.conn()?.query_drop("START TRANSACTION").await?;
        for step in steps {
            match step {
                TxStep::Statement(sql) => self.conn()?.query_drop(sql.as_str()).await?,
                TxStep::Load(load) => self.insert_rows(load).await?,
            }
        }
        self.conn()?.query_drop("COMMIT").await?;
        Ok(())
    }

    /// Client-side loader: validated rows go in as one prepared batch
    /// insert per staging table, empty cells as SQL NULL.
    async fn insert_rows(&mut self, load: &TableLoad) -> Result<()> {
        if load.rows.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; load.columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            load.table,
            load.columns.join(", "),
            placeholders
        );

        let params = load.rows.iter().map(|row| {
            Params::Positional(
                row.iter()
                    .map(|cell| match cell {
                        Some(text) => Value::Bytes(text.clone().into_bytes()),
                        None => Value::NULL,
                    })
                    .collect(),
            )
        });

        tracing::debug!(table = %load.table, rows = load.rows.len(), "staging rows");
        self.conn()?.exec_batch(sql.as_str(), params).await?;
        Ok(())
    }
}

#[async_trait]
impl DbChannel for DirectChannel {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Direct
    }

    async fn query_rows(&mut self, sql: &str) -> Result<Vec<TextRow>> {
        let rows: Vec<mysql_async::Row> = self.conn()?.query(sql).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.unwrap().into_iter().map(value_to_text).collect())
            .collect())
    }

    async fn run_transaction(&mut self, steps: Vec<TxStep>) -> Result<()> {
        self.conn()?
            .query_drop("SET SESSION FOREIGN_KEY_CHECKS = 0")
            .await?;

        let outcome = self.run_steps(&steps).await;

        // Rollback and restore the session flag on the error path too; the
        // session outlives a failed transaction in this mode.
        if outcome.is_err() {
            if let Ok(conn) = self.conn() {
                let _ = conn.query_drop("ROLLBACK").await;
            }
        }
        if let Ok(conn) = self.conn() {
            let _ = conn.query_drop("SET SESSION FOREIGN_KEY_CHECKS = 1").await;
        }

        outcome
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.disconnect().await?;
        }
        Ok(())
    }
}

/// Render one protocol value as nullable text, matching what the server
/// itself prints for the same value.
fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(n) => Some(n.to_string()),
        Value::UInt(n) => Some(n.to_string()),
        Value::Float(n) => Some(n.to_string()),
        Value::Double(n) => Some(n.to_string()),
        Value::Date(y, mo, d, h, mi, s, 0) => {
            Some(format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}"))
        }
        Value::Date(y, mo, d, h, mi, s, us) => Some(format!(
            "{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}.{us:06}"
        )),
        Value::Time(neg, days, h, mi, s, us) => {
            let sign = if neg { "-" } else { "" };
            let hours = u32::from(h) + days * 24;
            if us == 0 {
                Some(format!("{sign}{hours:02}:{mi:02}:{s:02}"))
            } else {
                Some(format!("{sign}{hours:02}:{mi:02}:{s:02}.{us:06}"))
            }
        }
    }
}
