//! Check command implementation.
//!
//! Resolves the channel and schema context exactly the way export and
//! import do, then reads one `COUNT(*)` per live catalog table. Strictly
//! read-only; useful as a preflight before either primary command.

use crate::channel::resolve::resolve_channel;
use crate::channel::{DbChannel, scalar};
use crate::cli::CheckArgs;
use crate::error::{Error, Result};
use crate::schema::{SchemaContext, resolve_context};
use crate::sync::EntityCounts;
use serde::Serialize;

/// Live table behind each snapshot entity, in layout order.
const LIVE_TABLES: [(&str, &str); 5] = [
    ("products", "product"),
    ("variants", "product_attribute"),
    ("categories", "category"),
    ("memberships", "category_product"),
    ("images", "image"),
];

/// Output for the check command.
#[derive(Serialize)]
struct CheckOutput {
    mode: String,
    target: String,
    prefix: String,
    id_lang: u32,
    id_shop: u32,
    id_shop_group: u32,
    counts: EntityCounts,
}

/// Execute the check command.
pub fn execute(args: &CheckArgs, json: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;
    rt.block_on(execute_async(args, json))
}

async fn execute_async(args: &CheckArgs, json: bool) -> Result<()> {
    let mut resolved = resolve_channel(&args.connection.resolve_options()).await?;
    let ctx = resolve_context(
        resolved.channel.as_mut(),
        &args.connection.context_overrides(),
        resolved.prefix_hint.as_deref(),
    )
    .await?;

    let counts = live_counts(resolved.channel.as_mut(), &ctx).await?;
    resolved.channel.close().await?;

    let output = CheckOutput {
        mode: resolved.mode.as_str().to_string(),
        target: resolved.target,
        prefix: ctx.prefix,
        id_lang: ctx.id_lang,
        id_shop: ctx.id_shop,
        id_shop_group: ctx.id_shop_group,
        counts,
    };

    if json {
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    use colored::Colorize;
    println!(
        "{} {} ({})",
        "Connection OK:".green().bold(),
        output.target,
        output.mode
    );
    println!();
    println!("  Prefix:   {}", output.prefix);
    println!("  Language: {}", output.id_lang);
    println!("  Shop:     {} (group {})", output.id_shop, output.id_shop_group);
    println!();
    println!("  Products:    {}", output.counts.products);
    println!("  Variants:    {}", output.counts.variants);
    println!("  Categories:  {}", output.counts.categories);
    println!("  Memberships: {}", output.counts.memberships);
    println!("  Images:      {}", output.counts.images);
    Ok(())
}

/// Read-only row counts over the live catalog tables.
async fn live_counts(channel: &mut dyn DbChannel, ctx: &SchemaContext) -> Result<EntityCounts> {
    let mut counts = EntityCounts::default();
    for (entity, base) in LIVE_TABLES {
        let sql = format!("SELECT COUNT(*) FROM {}", ctx.table(base));
        let rows = channel.query_rows(&sql).await?;
        let count = scalar(&rows).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        counts.set(entity, count);
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{StubChannel, row};

    fn context() -> SchemaContext {
        SchemaContext {
            prefix: "ps_".into(),
            id_lang: 1,
            id_shop: 1,
            id_shop_group: 1,
        }
    }

    #[tokio::test]
    async fn test_live_counts_query_every_entity_table() {
        let mut chan = StubChannel::new();
        for n in ["12", "34", "5", "60", "9"] {
            chan.push_result(vec![row(&[Some(n)])]);
        }

        let counts = live_counts(&mut chan, &context()).await.unwrap();
        assert_eq!(counts.products, 12);
        assert_eq!(counts.variants, 34);
        assert_eq!(counts.categories, 5);
        assert_eq!(counts.memberships, 60);
        assert_eq!(counts.images, 9);

        assert_eq!(chan.queries.len(), 5);
        assert_eq!(chan.queries[0], "SELECT COUNT(*) FROM ps_product");
        assert_eq!(chan.queries[3], "SELECT COUNT(*) FROM ps_category_product");
    }

    #[tokio::test]
    async fn test_unparseable_count_reads_as_zero() {
        let mut chan = StubChannel::new();
        chan.push_result(vec![row(&[None])]);
        for _ in 0..4 {
            chan.push_result(vec![row(&[Some("1")])]);
        }

        let counts = live_counts(&mut chan, &context()).await.unwrap();
        assert_eq!(counts.products, 0);
        assert_eq!(counts.variants, 1);
    }
}
