//! Connection configuration discovery.
//!
//! This module resolves database connection parameters for direct mode by
//! probing the on-disk configuration layouts a store installation carries,
//! newest first, and merging explicit CLI overrides on top.
//!
//! # Layouts
//!
//! - `app/config/parameters.php` — 1.7-style array layout
//!   (`'database_host' => 'localhost',`)
//! - `config/settings.inc.php` — legacy define layout
//!   (`define('_DB_SERVER_', 'localhost');`)
//!
//! The first layout that parses wins; individual parameters supplied by the
//! caller always take precedence over discovered values.

use crate::error::{Error, Result};

use regex::Regex;
use std::fmt;
use std::path::Path;

/// Default MySQL port when neither layout nor caller specifies one.
pub const DEFAULT_DB_PORT: u16 = 3306;

/// Fully-resolved connection parameters.
///
/// `Debug` redacts the password; nothing in the crate prints it in cleartext.
#[derive(Clone, PartialEq, Eq)]
pub struct DbParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for DbParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

impl DbParams {
    /// Human-readable target description, safe to log.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

/// Per-parameter overrides supplied by the caller.
///
/// Any field set here wins over whatever a layout probe discovered.
#[derive(Debug, Clone, Default)]
pub struct DbOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

/// One layout's worth of discovered parameters.
#[derive(Debug, Clone)]
struct LayoutParams {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
    prefix_hint: Option<String>,
}

type LayoutProbe = fn(&Path) -> Option<LayoutParams>;

/// Probe list in priority order: newest layout first, oldest last.
const LAYOUT_PROBES: &[(&str, LayoutProbe)] = &[
    ("app/config/parameters.php", probe_parameters_php),
    ("config/settings.inc.php", probe_settings_inc),
];

/// Resolve direct-mode connection parameters.
///
/// Probes the known layouts under `shop_root` in priority order, merges
/// `overrides` on top, and returns the parameters plus a table-prefix hint
/// when a layout carried one.
///
/// # Errors
///
/// Returns [`Error::ConfigNotFound`] when no layout parses and the override
/// set does not cover host, user, password and database on its own.
pub fn resolve_direct_params(
    shop_root: &Path,
    overrides: &DbOverrides,
) -> Result<(DbParams, Option<String>)> {
    let discovered = LAYOUT_PROBES
        .iter()
        .find_map(|(rel, probe)| {
            let found = probe(shop_root);
            if found.is_some() {
                tracing::debug!(layout = rel, "connection layout parsed");
            }
            found
        });

    let prefix_hint = discovered.as_ref().and_then(|l| l.prefix_hint.clone());

    let host = overrides
        .host
        .clone()
        .or_else(|| discovered.as_ref().map(|l| l.host.clone()));
    let port = overrides
        .port
        .or_else(|| discovered.as_ref().map(|l| l.port))
        .unwrap_or(DEFAULT_DB_PORT);
    let user = overrides
        .user
        .clone()
        .or_else(|| discovered.as_ref().map(|l| l.user.clone()));
    let password = overrides
        .password
        .clone()
        .or_else(|| discovered.as_ref().map(|l| l.password.clone()));
    let database = overrides
        .database
        .clone()
        .or_else(|| discovered.as_ref().map(|l| l.database.clone()));

    match (host, user, password, database) {
        (Some(host), Some(user), Some(password), Some(database))
            if !host.is_empty() && !user.is_empty() && !database.is_empty() =>
        {
            Ok((
                DbParams {
                    host,
                    port,
                    user,
                    password,
                    database,
                },
                prefix_hint,
            ))
        }
        _ => Err(Error::ConfigNotFound {
            searched: LAYOUT_PROBES
                .iter()
                .map(|(rel, _)| shop_root.join(rel))
                .collect(),
        }),
    }
}

/// Parse the 1.7-style `parameters.php` array layout.
fn probe_parameters_php(shop_root: &Path) -> Option<LayoutParams> {
    let path = shop_root.join("app/config/parameters.php");
    let text = std::fs::read_to_string(path).ok()?;

    let re = Regex::new(r"'database_(\w+)'\s*=>\s*'((?:\\.|[^'\\])*)'").ok()?;
    let mut host = None;
    let mut port = None;
    let mut user = None;
    let mut password = None;
    let mut database = None;
    let mut prefix = None;

    for cap in re.captures_iter(&text) {
        let value = unescape_php(&cap[2]);
        match &cap[1] {
            "host" => host = Some(value),
            "port" => port = Some(value),
            "user" => user = Some(value),
            "password" => password = Some(value),
            "name" => database = Some(value),
            "prefix" => prefix = Some(value),
            _ => {}
        }
    }

    let (host, inline_port) = split_host_port(&host?);
    Some(LayoutParams {
        host,
        port: port
            .filter(|p| !p.is_empty())
            .and_then(|p| p.parse().ok())
            .or(inline_port)
            .unwrap_or(DEFAULT_DB_PORT),
        user: user?,
        password: password.unwrap_or_default(),
        database: database?,
        prefix_hint: prefix.filter(|p| !p.is_empty()),
    })
}

/// Parse the legacy `settings.inc.php` define layout.
fn probe_settings_inc(shop_root: &Path) -> Option<LayoutParams> {
    let path = shop_root.join("config/settings.inc.php");
    let text = std::fs::read_to_string(path).ok()?;

    let re = Regex::new(r"define\('_DB_([A-Z_]+)_',\s*'((?:\\.|[^'\\])*)'\)").ok()?;
    let mut server = None;
    let mut user = None;
    let mut password = None;
    let mut database = None;
    let mut prefix = None;

    for cap in re.captures_iter(&text) {
        let value = unescape_php(&cap[2]);
        match &cap[1] {
            "SERVER" => server = Some(value),
            "USER" => user = Some(value),
            "PASSWD" => password = Some(value),
            "NAME" => database = Some(value),
            "PREFIX" => prefix = Some(value),
            _ => {}
        }
    }

    let (host, inline_port) = split_host_port(&server?);
    Some(LayoutParams {
        host,
        port: inline_port.unwrap_or(DEFAULT_DB_PORT),
        user: user?,
        password: password.unwrap_or_default(),
        database: database?,
        prefix_hint: prefix.filter(|p| !p.is_empty()),
    })
}

/// Split a `host:port` server string; plain hostnames pass through.
fn split_host_port(server: &str) -> (String, Option<u16>) {
    match server.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (server.to_string(), None),
        },
        None => (server.to_string(), None),
    }
}

/// Undo single-quoted PHP string escaping (`\'` and `\\`).
fn unescape_php(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('\'') => out.push('\''),
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
    out
}
