//! Indirect command channel.
//!
//! Issues SQL through `docker exec` against the database container's own
//! client. Reads use batch mode (tab-separated, escaped); mutation ships the
//! whole step list as one scripted session, so the transaction and the
//! connection-scoped staging tables live and die with a single `mysql`
//! process. Bulk-load files are copied into a server-readable scratch
//! directory first and removed afterward.

use crate::channel::{ConnectionMode, DbChannel, TableLoad, TextRow, TxStep};
use crate::config::DbParams;
use crate::error::{Error, Result};

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::process::{Command, Stdio};

pub struct DockerChannel {
    service: String,
    params: DbParams,
    scratch_dir: String,
}

impl DockerChannel {
    /// Build a channel for a running database container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the scratch directory is not
    /// an absolute path of plain characters (it is interpolated into
    /// statements and shell-free command lines).
    pub fn new(service: String, params: DbParams, scratch_dir: String) -> Result<Self> {
        if !scratch_dir.starts_with('/')
            || !scratch_dir
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'))
        {
            return Err(Error::InvalidArgument(format!(
                "scratch directory must be an absolute plain path, got '{scratch_dir}'"
            )));
        }
        Ok(Self {
            service,
            params,
            scratch_dir,
        })
    }

    /// In-container path for one staged file, unique per invocation.
    fn remote_path(&self, table: &str) -> String {
        format!(
            "{}/catsync-{}-{}.tsv",
            self.scratch_dir,
            std::process::id(),
            table
        )
    }

    fn mysql_args(&self, interactive: bool, batch: bool) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if interactive {
            args.push("-i".to_string());
        }
        // Names the variable only; the value travels via the child process
        // environment, never on a command line.
        args.push("-e".to_string());
        args.push("MYSQL_PWD".to_string());
        args.push(self.service.clone());
        args.push("mysql".to_string());
        args.push("--default-character-set=utf8mb4".to_string());
        if batch {
            args.push("-N".to_string());
            args.push("-B".to_string());
        }
        args.push("-u".to_string());
        args.push(self.params.user.clone());
        args.push(self.params.database.clone());
        args
    }

    fn run_query(&self, sql: &str) -> Result<String> {
        let mut args = self.mysql_args(false, true);
        args.push("-e".to_string());
        args.push(sql.to_string());

        let output = Command::new("docker")
            .args(&args)
            .env("MYSQL_PWD", &self.params.password)
            .output()
            .map_err(|e| Error::Channel(format!("docker exec failed: {e}")))?;

        if !output.status.success() {
            return Err(Error::Channel(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_script(&self, script: &str) -> Result<()> {
        let mut child = Command::new("docker")
            .args(self.mysql_args(true, false))
            .env("MYSQL_PWD", &self.params.password)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Channel(format!("docker exec failed: {e}")))?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(script.as_bytes())
                .map_err(|e| Error::Channel(format!("writing statement script: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Error::Channel(format!("docker exec failed: {e}")))?;
        if !output.status.success() {
            return Err(Error::Channel(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn copy_in(&self, local: &std::path::Path, remote: &str) -> Result<()> {
        let target = format!("{}:{}", self.service, remote);
        let output = Command::new("docker")
            .args(["cp", &local.to_string_lossy(), &target])
            .output()
            .map_err(|e| Error::Channel(format!("docker cp failed: {e}")))?;
        if !output.status.success() {
            return Err(Error::Channel(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn remove_remote(&self, paths: &[String]) {
        if paths.is_empty() {
            return;
        }
        let mut args = vec!["exec", self.service.as_str(), "rm", "-f"];
        args.extend(paths.iter().map(String::as_str));
        match Command::new("docker").args(&args).output() {
            Ok(output) if output.status.success() => {}
            Ok(output) => tracing::warn!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "failed to remove staged load files from container"
            ),
            Err(e) => tracing::warn!(error = %e, "failed to remove staged load files"),
        }
    }
}

#[async_trait]
impl DbChannel for DockerChannel {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Indirect
    }

    async fn query_rows(&mut self, sql: &str) -> Result<Vec<TextRow>> {
        let stdout = self.run_query(sql)?;
        Ok(parse_batch_rows(&stdout))
    }

    async fn run_transaction(&mut self, steps: Vec<TxStep>) -> Result<()> {
        let mut copied: Vec<String> = Vec::new();
        let mut script = String::from("SET SESSION FOREIGN_KEY_CHECKS = 0;\nSTART TRANSACTION;\n");

        let mut outcome = Ok(());
        for step in &steps {
            match step {
                TxStep::Statement(sql) => {
                    script.push_str(sql);
                    script.push_str(";\n");
                }
                TxStep::Load(load) => {
                    let remote = self.remote_path(&load.table);
                    if let Err(e) = self.copy_in(&load.path, &remote) {
                        outcome = Err(e);
                        break;
                    }
                    copied.push(remote.clone());
                    script.push_str(&build_load_data(load, &remote));
                    script.push_str(";\n");
                }
            }
        }
        script.push_str("COMMIT;\n");

        if outcome.is_ok() {
            tracing::debug!(steps = steps.len(), "running scripted transaction");
            // A statement failure aborts the mysql process mid-script; the
            // session teardown rolls the open transaction back and discards
            // the temporary tables and session flags with it.
            outcome = self.run_script(&script);
        }

        self.remove_remote(&copied);
        outcome
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// `LOAD DATA` statement matching the snapshot flat-file format.
fn build_load_data(load: &TableLoad, remote: &str) -> String {
    format!(
        "LOAD DATA INFILE '{remote}' INTO TABLE {table} \
         CHARACTER SET utf8mb4 \
         FIELDS TERMINATED BY '\\t' \
         LINES TERMINATED BY '\\n' \
         IGNORE 1 LINES ({columns})",
        table = load.table,
        columns = load.columns.join(", "),
    )
}

/// Parse batch-mode (`-N -B`) client output into rows.
fn parse_batch_rows(stdout: &str) -> Vec<TextRow> {
    stdout
        .lines()
        .map(|line| line.split('\t').map(unescape_batch_field).collect())
        .collect()
}

/// Undo batch-mode output escaping: `\n`, `\t`, `\0`, `\\`; a bare `NULL`
/// cell is SQL NULL.
fn unescape_batch_field(field: &str) -> Option<String> {
    if field == "NULL" {
        return None;
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('0') => out.push('\0'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

// ── Runtime probes (used by channel resolution) ───────────────

/// Whether a Docker daemon answers at all.
#[must_use]
pub fn docker_available() -> bool {
    Command::new("docker")
        .args(["version", "--format", "{{.Server.Version}}"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Whether a container with exactly this name is running.
#[must_use]
pub fn container_running(name: &str) -> bool {
    Command::new("docker")
        .args(["ps", "--format", "{{.Names}}"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .lines()
                .any(|line| line.trim() == name)
        })
        .unwrap_or(false)
}

/// Environment of a running container, as seen by its init process.
///
/// # Errors
///
/// Returns [`Error::Channel`] when `docker exec` fails (stopped container,
/// no daemon).
pub fn container_env(name: &str) -> Result<HashMap<String, String>> {
    let output = Command::new("docker")
        .args(["exec", name, "env"])
        .output()
        .map_err(|e| Error::Channel(format!("docker exec failed: {e}")))?;
    if !output.status.success() {
        return Err(Error::Channel(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            line.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_params() -> DbParams {
        DbParams {
            host: "localhost".into(),
            port: 3306,
            user: "root".into(),
            password: "admin".into(),
            database: "prestashop".into(),
        }
    }

    #[test]
    fn test_unescape_batch_field() {
        assert_eq!(unescape_batch_field("NULL"), None);
        assert_eq!(unescape_batch_field(""), Some(String::new()));
        assert_eq!(
            unescape_batch_field("a\\tb\\nc\\\\d"),
            Some("a\tb\nc\\d".to_string())
        );
        assert_eq!(unescape_batch_field("plain"), Some("plain".to_string()));
    }

    #[test]
    fn test_parse_batch_rows() {
        let rows = parse_batch_rows("1\tSKU-X\tNULL\n2\t\tboth\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1].as_deref(), Some("SKU-X"));
        assert_eq!(rows[0][2], None);
        assert_eq!(rows[1][1].as_deref(), Some(""));
    }

    #[test]
    fn test_build_load_data_shape() {
        let load = TableLoad {
            table: "stg_products".into(),
            columns: &["id_product", "reference"],
            path: PathBuf::from("/snap/products.tsv"),
            rows: vec![],
        };
        let sql = build_load_data(&load, "/var/lib/mysql-files/catsync-1-stg_products.tsv");
        assert!(sql.starts_with("LOAD DATA INFILE '/var/lib/mysql-files/"));
        assert!(sql.contains("INTO TABLE stg_products"));
        assert!(sql.contains("FIELDS TERMINATED BY '\\t'"));
        assert!(sql.contains("IGNORE 1 LINES (id_product, reference)"));
    }

    #[test]
    fn test_scratch_dir_validation() {
        assert!(DockerChannel::new("db".into(), sample_params(), "relative/path".into()).is_err());
        assert!(
            DockerChannel::new("db".into(), sample_params(), "/tmp/it's".into()).is_err()
        );
        assert!(
            DockerChannel::new("db".into(), sample_params(), "/var/lib/mysql-files".into())
                .is_ok()
        );
    }

    #[test]
    fn test_remote_path_is_scoped_and_unique_per_table() {
        let chan =
            DockerChannel::new("db".into(), sample_params(), "/var/lib/mysql-files".into())
                .unwrap();
        let a = chan.remote_path("stg_products");
        let b = chan.remote_path("stg_images");
        assert!(a.starts_with("/var/lib/mysql-files/catsync-"));
        assert!(a.ends_with("-stg_products.tsv"));
        assert_ne!(a, b);
    }
}
