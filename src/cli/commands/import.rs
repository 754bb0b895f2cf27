//! Import command implementation.
//!
//! The snapshot is loaded and validated before any connection is made, so a
//! missing or corrupt snapshot never touches the database. Asset restore
//! runs after the merge transaction has committed; its failures are
//! warnings in the report, never process failures.

use crate::archive::{chown_tree, restore_images};
use crate::channel::TxStep;
use crate::channel::resolve::resolve_channel;
use crate::cli::ImportArgs;
use crate::error::{Error, Result};
use crate::schema::resolve_context;
use crate::snapshot::ARCHIVE_FILE;
use crate::sync::{EntityCounts, ImportReport, Importer, load_snapshot};
use tracing::{info, warn};

/// Execute the import command.
pub fn execute(args: &ImportArgs, json: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;
    rt.block_on(execute_async(args, json))
}

async fn execute_async(args: &ImportArgs, json: bool) -> Result<()> {
    let snapshot = load_snapshot(&args.snapshot_dir)?;
    let staged = snapshot.counts.clone();

    let mut resolved = resolve_channel(&args.connection.resolve_options()).await?;
    let ctx = resolve_context(
        resolved.channel.as_mut(),
        &args.connection.context_overrides(),
        resolved.prefix_hint.as_deref(),
    )
    .await?;

    let mut importer = Importer::new(resolved.channel.as_mut(), ctx);

    if args.dry_run {
        let steps = importer.plan(snapshot);
        resolved.channel.close().await?;
        return print_plan(args, &staged, &steps, json);
    }

    info!(
        target = %resolved.target,
        mode = resolved.mode.as_str(),
        rows = staged.total(),
        "merging snapshot"
    );
    importer.import(snapshot).await?;
    resolved.channel.close().await?;

    let mut assets_restored = false;
    let mut warnings = Vec::new();
    let archive = args.snapshot_dir.join(ARCHIVE_FILE);
    if !args.no_assets && archive.is_file() {
        let images_dir = args.connection.images_dir(args.images_dir.as_ref());
        match restore_images(&archive, &images_dir) {
            Ok(()) => {
                assets_restored = true;
                if let Err(e) = chown_tree(&images_dir, &args.web_user) {
                    warn!(error = %e, "ownership normalization failed");
                    warnings.push(format!(
                        "could not chown restored images to {}: {e}",
                        args.web_user
                    ));
                }
            }
            Err(e) => {
                warn!(error = %e, "asset restore failed; the catalog merge is already committed");
                warnings.push(format!("asset restore failed: {e}"));
            }
        }
    }

    let report = ImportReport {
        snapshot_dir: args.snapshot_dir.clone(),
        staged,
        dry_run: false,
        assets_restored,
        warnings,
    };
    print_report(&report, json)
}

fn print_plan(
    args: &ImportArgs,
    staged: &EntityCounts,
    steps: &[TxStep],
    json: bool,
) -> Result<()> {
    if json {
        let output = serde_json::json!({
            "snapshot_dir": args.snapshot_dir.display().to_string(),
            "dry_run": true,
            "staged": staged,
            "plan": steps.iter().map(TxStep::describe).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!(
        "Dry run for {}: {} rows staged, {} steps planned, nothing executed.",
        args.snapshot_dir.display(),
        staged.total(),
        steps.len()
    );
    println!();
    for step in steps {
        println!("  {}", step.describe());
    }
    Ok(())
}

fn print_report(report: &ImportReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    use colored::Colorize;
    println!(
        "{} {}",
        "Import complete:".green().bold(),
        report.snapshot_dir.display()
    );
    println!();
    println!("  Products:    {}", report.staged.products);
    println!("  Variants:    {}", report.staged.variants);
    println!("  Categories:  {}", report.staged.categories);
    println!("  Memberships: {}", report.staged.memberships);
    println!("  Images:      {}", report.staged.images);
    println!();
    println!("  Total: {} rows merged", report.staged.total());
    if report.assets_restored {
        println!("  Assets: restored");
    }
    for warning in &report.warnings {
        println!("  {} {warning}", "Warning:".yellow().bold());
    }
    Ok(())
}
