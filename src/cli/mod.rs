//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::channel::{ConnectionMode, resolve::ResolveOptions};
use crate::config::DbOverrides;
use crate::schema::ContextOverrides;

pub mod commands;

/// Catalog snapshot and restore tool for PrestaShop-style stores
#[derive(Parser, Debug)]
#[command(name = "catsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export the live catalog into a snapshot directory
    Export(ExportArgs),

    /// Merge a snapshot directory back into the live catalog
    Import(ImportArgs),

    /// Verify connectivity and report live catalog row counts
    Check(CheckArgs),

    /// Print version information
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

// ============================================================================
// Shared connection / context arguments
// ============================================================================

/// Connection and schema-context options shared by the database commands.
///
/// Overrides always win over discovery: a `--db-*` flag beats whatever a
/// config layout or container environment carries, and `--prefix` /
/// `--lang-id` / `--shop-id` / `--shop-group-id` skip the live-schema lookup
/// for that value entirely.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Connection mode (auto probes for the containerized stack first)
    #[arg(long, value_enum, default_value_t)]
    pub mode: ConnectionMode,

    /// Store installation root, searched for config layouts in direct mode
    #[arg(long, default_value = ".")]
    pub shop_root: PathBuf,

    /// Application-tier container name (indirect mode)
    #[arg(long, default_value = "prestashop")]
    pub app_service: String,

    /// Database-tier container name (indirect mode)
    #[arg(long, default_value = "mysql")]
    pub db_service: String,

    /// Server-readable scratch directory for bulk loads (indirect mode)
    #[arg(long, default_value = "/var/lib/mysql-files")]
    pub scratch_dir: String,

    /// Database host override
    #[arg(long)]
    pub db_host: Option<String>,

    /// Database port override
    #[arg(long)]
    pub db_port: Option<u16>,

    /// Database user override
    #[arg(long)]
    pub db_user: Option<String>,

    /// Database password override
    #[arg(long, env = "CATSYNC_DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Database name override
    #[arg(long)]
    pub db_name: Option<String>,

    /// Table-name prefix override (skips inference)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Language id override (skips the configuration lookup)
    #[arg(long)]
    pub lang_id: Option<u32>,

    /// Shop id override
    #[arg(long)]
    pub shop_id: Option<u32>,

    /// Shop-group id override
    #[arg(long)]
    pub shop_group_id: Option<u32>,
}

impl ConnectionArgs {
    /// Channel-resolution view of these arguments.
    #[must_use]
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            mode: self.mode,
            shop_root: self.shop_root.clone(),
            app_service: self.app_service.clone(),
            db_service: self.db_service.clone(),
            scratch_dir: self.scratch_dir.clone(),
            overrides: DbOverrides {
                host: self.db_host.clone(),
                port: self.db_port,
                user: self.db_user.clone(),
                password: self.db_password.clone(),
                database: self.db_name.clone(),
            },
        }
    }

    /// Schema-context view of these arguments.
    #[must_use]
    pub fn context_overrides(&self) -> ContextOverrides {
        ContextOverrides {
            prefix: self.prefix.clone(),
            id_lang: self.lang_id,
            id_shop: self.shop_id,
            id_shop_group: self.shop_group_id,
        }
    }

    /// Image tree for this invocation: explicit flag or `<shop-root>/img`.
    #[must_use]
    pub fn images_dir(&self, explicit: Option<&PathBuf>) -> PathBuf {
        explicit
            .cloned()
            .unwrap_or_else(|| self.shop_root.join("img"))
    }
}

// ============================================================================
// Per-command arguments
// ============================================================================

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Snapshot directory to create (default: ./snapshot-<timestamp>)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Image tree to archive (default: <shop-root>/img)
    #[arg(long)]
    pub images_dir: Option<PathBuf>,

    /// Skip the image archive
    #[arg(long)]
    pub no_assets: bool,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Snapshot directory to merge
    pub snapshot_dir: PathBuf,

    /// Validate the snapshot and print the statement plan without executing
    #[arg(long)]
    pub dry_run: bool,

    /// Image tree to restore into (default: <shop-root>/img)
    #[arg(long)]
    pub images_dir: Option<PathBuf>,

    /// Owner for restored image files
    #[arg(long, default_value = "www-data")]
    pub web_user: String,

    /// Skip asset restore even when the snapshot carries an archive
    #[arg(long)]
    pub no_assets: bool,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_export_defaults() {
        let cli = Cli::parse_from(["catsync", "export"]);
        let Commands::Export(args) = cli.command else {
            panic!("expected export");
        };
        assert!(args.output.is_none());
        assert!(!args.no_assets);
        assert_eq!(args.connection.mode, ConnectionMode::Auto);
        assert_eq!(args.connection.shop_root, PathBuf::from("."));
        assert_eq!(args.connection.db_service, "mysql");
        assert_eq!(args.connection.scratch_dir, "/var/lib/mysql-files");
    }

    #[test]
    fn test_import_takes_snapshot_dir_and_overrides() {
        let cli = Cli::parse_from([
            "catsync",
            "import",
            "/tmp/snapshot-x",
            "--dry-run",
            "--mode",
            "direct",
            "--db-host",
            "db.internal",
            "--prefix",
            "shop_",
            "--lang-id",
            "2",
        ]);
        let Commands::Import(args) = cli.command else {
            panic!("expected import");
        };
        assert_eq!(args.snapshot_dir, PathBuf::from("/tmp/snapshot-x"));
        assert!(args.dry_run);
        assert_eq!(args.web_user, "www-data");

        let opts = args.connection.resolve_options();
        assert_eq!(opts.mode, ConnectionMode::Direct);
        assert_eq!(opts.overrides.host.as_deref(), Some("db.internal"));

        let ctx = args.connection.context_overrides();
        assert_eq!(ctx.prefix.as_deref(), Some("shop_"));
        assert_eq!(ctx.id_lang, Some(2));
        assert_eq!(ctx.id_shop, None);
    }

    #[test]
    fn test_images_dir_derived_from_shop_root() {
        let cli = Cli::parse_from(["catsync", "export", "--shop-root", "/srv/shop"]);
        let Commands::Export(args) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(
            args.connection.images_dir(args.images_dir.as_ref()),
            PathBuf::from("/srv/shop/img")
        );

        let cli = Cli::parse_from([
            "catsync",
            "export",
            "--shop-root",
            "/srv/shop",
            "--images-dir",
            "/mnt/img",
        ]);
        let Commands::Export(args) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(
            args.connection.images_dir(args.images_dir.as_ref()),
            PathBuf::from("/mnt/img")
        );
    }

    #[test]
    fn test_global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["catsync", "check", "--json", "-vv"]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
    }
}
