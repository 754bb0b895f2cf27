//! Export command implementation.
//!
//! Orchestrates one full snapshot: resolve the channel and schema context,
//! run the exporter, archive the image tree, then seal the directory with a
//! manifest. The channel is released before any archive work starts.

use crate::archive::archive_images;
use crate::channel::resolve::resolve_channel;
use crate::cli::ExportArgs;
use crate::error::{Error, Result};
use crate::schema::resolve_context;
use crate::snapshot::{self, Manifest};
use crate::sync::{ExportReport, Exporter};
use chrono::Utc;
use std::path::PathBuf;
use tracing::{info, warn};

/// Execute the export command.
pub fn execute(args: &ExportArgs, json: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;
    rt.block_on(execute_async(args, json))
}

async fn execute_async(args: &ExportArgs, json: bool) -> Result<()> {
    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(snapshot::default_dir_name(Utc::now())));

    let mut resolved = resolve_channel(&args.connection.resolve_options()).await?;
    let ctx = resolve_context(
        resolved.channel.as_mut(),
        &args.connection.context_overrides(),
        resolved.prefix_hint.as_deref(),
    )
    .await?;
    info!(
        target = %resolved.target,
        mode = resolved.mode.as_str(),
        dir = %output_dir.display(),
        "exporting catalog"
    );

    let mut exporter = Exporter::new(resolved.channel.as_mut(), ctx.clone(), output_dir.clone());
    let counts = exporter.export().await?;
    resolved.channel.close().await?;

    let mut assets_archived = false;
    if !args.no_assets {
        let images_dir = args.connection.images_dir(args.images_dir.as_ref());
        if images_dir.is_dir() {
            let bytes = archive_images(&images_dir, &output_dir.join(snapshot::ARCHIVE_FILE))?;
            info!(bytes, "image tree archived");
            assets_archived = true;
        } else {
            warn!(dir = %images_dir.display(), "no image tree at this path, skipping archive");
        }
    }

    let manifest = Manifest::build(&output_dir, &resolved.target, &ctx, counts.clone())?;
    snapshot::write_manifest(&output_dir, &manifest)?;

    let report = ExportReport {
        snapshot_dir: output_dir,
        counts,
        assets_archived,
    };
    print_report(&report, json)
}

fn print_report(report: &ExportReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    use colored::Colorize;
    println!(
        "{} {}",
        "Export complete:".green().bold(),
        report.snapshot_dir.display()
    );
    println!();
    println!("  Products:    {}", report.counts.products);
    println!("  Variants:    {}", report.counts.variants);
    println!("  Categories:  {}", report.counts.categories);
    println!("  Memberships: {}", report.counts.memberships);
    println!("  Images:      {}", report.counts.images);
    println!();
    println!("  Total: {} rows", report.counts.total());
    if report.assets_archived {
        println!("  Assets: {}", snapshot::ARCHIVE_FILE);
    }
    Ok(())
}
