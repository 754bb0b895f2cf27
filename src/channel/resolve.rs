//! Channel resolution.
//!
//! Picks the connection mode once per invocation, discovers credentials for
//! it, and hands back one boxed [`DbChannel`] plus the context hints picked
//! up along the way. Auto mode prefers the containerized stack when both
//! named services are running, and falls back to direct otherwise.

use crate::channel::direct::DirectChannel;
use crate::channel::docker::{self, DockerChannel};
use crate::channel::{ConnectionMode, DbChannel};
use crate::config::{self, DbOverrides, DbParams, DEFAULT_DB_PORT};
use crate::error::{Error, Result};

use std::collections::HashMap;
use std::path::PathBuf;

/// Documented fallbacks for containerized stacks whose environment exports
/// nothing usable (the stock image defaults).
const FALLBACK_USER: &str = "root";
const FALLBACK_PASSWORD: &str = "admin";
const FALLBACK_DATABASE: &str = "prestashop";

/// Everything channel resolution needs from the command line.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub mode: ConnectionMode,
    pub shop_root: PathBuf,
    pub app_service: String,
    pub db_service: String,
    pub scratch_dir: String,
    pub overrides: DbOverrides,
}

/// A live channel plus loggable facts about how it was resolved.
pub struct ResolvedChannel {
    pub channel: Box<dyn DbChannel>,
    pub mode: ConnectionMode,
    /// Target description safe to print; never contains the password.
    pub target: String,
    /// Table-prefix hint picked up during discovery, if any.
    pub prefix_hint: Option<String>,
}

/// Resolve the database channel for this invocation.
///
/// # Errors
///
/// [`Error::ServiceNotFound`] in indirect mode when the daemon or either
/// named container is missing; [`Error::ConfigNotFound`] in direct mode when
/// no layout parses and overrides are incomplete; [`Error::Database`] when
/// the direct connection is refused.
pub async fn resolve_channel(opts: &ResolveOptions) -> Result<ResolvedChannel> {
    let mode = match opts.mode {
        ConnectionMode::Auto => {
            if docker::docker_available()
                && docker::container_running(&opts.db_service)
                && docker::container_running(&opts.app_service)
            {
                ConnectionMode::Indirect
            } else {
                ConnectionMode::Direct
            }
        }
        explicit => explicit,
    };
    tracing::debug!(mode = mode.as_str(), "database channel selected");

    match mode {
        ConnectionMode::Indirect => resolve_indirect(opts),
        _ => resolve_direct(opts).await,
    }
}

async fn resolve_direct(opts: &ResolveOptions) -> Result<ResolvedChannel> {
    let (params, prefix_hint) = config::resolve_direct_params(&opts.shop_root, &opts.overrides)?;
    let target = params.describe();
    let channel = DirectChannel::connect(&params).await?;
    Ok(ResolvedChannel {
        channel: Box::new(channel),
        mode: ConnectionMode::Direct,
        target,
        prefix_hint,
    })
}

fn resolve_indirect(opts: &ResolveOptions) -> Result<ResolvedChannel> {
    if !docker::docker_available() {
        return Err(Error::ServiceNotFound {
            service: "docker".to_string(),
        });
    }
    for service in [&opts.app_service, &opts.db_service] {
        if !docker::container_running(service) {
            return Err(Error::ServiceNotFound {
                service: service.clone(),
            });
        }
    }

    let app_env = container_env_or_empty(&opts.app_service);
    let db_env = container_env_or_empty(&opts.db_service);
    let (params, prefix_hint) = indirect_params(&opts.overrides, &app_env, &db_env);

    let target = format!("docker:{}/{}", opts.db_service, params.database);
    let channel = DockerChannel::new(opts.db_service.clone(), params, opts.scratch_dir.clone())?;
    Ok(ResolvedChannel {
        channel: Box::new(channel),
        mode: ConnectionMode::Indirect,
        target,
        prefix_hint,
    })
}

fn container_env_or_empty(service: &str) -> HashMap<String, String> {
    match docker::container_env(service) {
        Ok(env) => env,
        Err(e) => {
            tracing::warn!(service, error = %e, "could not read container environment");
            HashMap::new()
        }
    }
}

/// Credential chain for indirect mode: explicit override, then the
/// application container, then the database container, then defaults.
fn indirect_params(
    overrides: &DbOverrides,
    app_env: &HashMap<String, String>,
    db_env: &HashMap<String, String>,
) -> (DbParams, Option<String>) {
    let pick = |env: &HashMap<String, String>, key: &str| -> Option<String> {
        env.get(key).filter(|v| !v.is_empty()).cloned()
    };

    let user = overrides
        .user
        .clone()
        .or_else(|| pick(app_env, "DB_USER"))
        .or_else(|| pick(db_env, "MYSQL_USER"))
        .or_else(|| pick(db_env, "MYSQL_ROOT_PASSWORD").map(|_| FALLBACK_USER.to_string()))
        .unwrap_or_else(|| FALLBACK_USER.to_string());
    let password = overrides
        .password
        .clone()
        .or_else(|| pick(app_env, "DB_PASSWD"))
        .or_else(|| pick(db_env, "MYSQL_PASSWORD"))
        .or_else(|| pick(db_env, "MYSQL_ROOT_PASSWORD"))
        .unwrap_or_else(|| FALLBACK_PASSWORD.to_string());
    let database = overrides
        .database
        .clone()
        .or_else(|| pick(app_env, "DB_NAME"))
        .or_else(|| pick(db_env, "MYSQL_DATABASE"))
        .unwrap_or_else(|| FALLBACK_DATABASE.to_string());
    let prefix_hint = pick(app_env, "DB_PREFIX");

    (
        DbParams {
            // The client runs inside the database container.
            host: "localhost".to_string(),
            port: DEFAULT_DB_PORT,
            user,
            password,
            database,
        },
        prefix_hint,
    )
}
