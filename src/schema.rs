//! Live schema context resolution.
//!
//! Every query the engine runs is parameterized by four values read from the
//! live schema: the table-name prefix, the default language id, and the
//! shop / shop-group ids. Each can be overridden; only the language id is
//! fatal when unresolvable, the rest fall back to documented defaults.

use crate::channel::{scalar, DbChannel};
use crate::error::{Error, Result};

/// Documented fallback when prefix inference yields nothing.
pub const DEFAULT_PREFIX: &str = "ps_";

/// Table-name suffix used to infer the prefix from live table names.
const PREFIX_PROBE_SUFFIX: &str = "configuration";

/// Shared context threaded through the exporter and the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SchemaContext {
    pub prefix: String,
    pub id_lang: u32,
    pub id_shop: u32,
    pub id_shop_group: u32,
}

impl SchemaContext {
    /// Prefixed live-table name.
    #[must_use]
    pub fn table(&self, base: &str) -> String {
        format!("{}{}", self.prefix, base)
    }
}

/// Explicit overrides for any context value.
#[derive(Debug, Clone, Default)]
pub struct ContextOverrides {
    pub prefix: Option<String>,
    pub id_lang: Option<u32>,
    pub id_shop: Option<u32>,
    pub id_shop_group: Option<u32>,
}

/// Resolve the schema context over a working channel.
///
/// `prefix_hint` carries a prefix discovered during connection resolution
/// (config layout or container environment); it ranks below live-table
/// inference but above the hardcoded fallback.
///
/// # Errors
///
/// Returns [`Error::SchemaContextMissing`] when the default language id
/// cannot be read, and [`Error::InvalidArgument`] for a prefix that is not a
/// plain identifier fragment.
pub async fn resolve_context(
    channel: &mut dyn DbChannel,
    overrides: &ContextOverrides,
    prefix_hint: Option<&str>,
) -> Result<SchemaContext> {
    let prefix = match &overrides.prefix {
        Some(p) => p.clone(),
        None => infer_prefix(channel, prefix_hint).await?,
    };
    ensure_prefix(&prefix)?;

    let id_lang = match overrides.id_lang {
        Some(id) => id,
        None => read_default_lang(channel, &prefix).await?,
    };

    let (mut id_shop, mut id_shop_group) = (overrides.id_shop, overrides.id_shop_group);
    if id_shop.is_none() || id_shop_group.is_none() {
        let (shop, group) = read_min_shop(channel, &prefix).await;
        id_shop = id_shop.or(Some(shop));
        id_shop_group = id_shop_group.or(Some(group));
    }

    let ctx = SchemaContext {
        prefix,
        id_lang,
        id_shop: id_shop.unwrap_or(1),
        id_shop_group: id_shop_group.unwrap_or(1),
    };
    tracing::debug!(
        prefix = %ctx.prefix,
        id_lang = ctx.id_lang,
        id_shop = ctx.id_shop,
        id_shop_group = ctx.id_shop_group,
        "schema context resolved"
    );
    Ok(ctx)
}

/// Infer the prefix from live table names matching the probe suffix,
/// first in sorted order for determinism.
async fn infer_prefix(channel: &mut dyn DbChannel, hint: Option<&str>) -> Result<String> {
    let rows = channel
        .query_rows(&format!("SHOW TABLES LIKE '%{PREFIX_PROBE_SUFFIX}'"))
        .await?;

    let mut candidates: Vec<String> = rows
        .iter()
        .filter_map(|row| row.first().and_then(Clone::clone))
        .filter_map(|name| {
            name.strip_suffix(PREFIX_PROBE_SUFFIX)
                .map(ToString::to_string)
        })
        .collect();
    candidates.sort();

    match candidates.into_iter().next() {
        Some(prefix) => Ok(prefix),
        None => Ok(hint.unwrap_or(DEFAULT_PREFIX).to_string()),
    }
}

async fn read_default_lang(channel: &mut dyn DbChannel, prefix: &str) -> Result<u32> {
    let sql =
        format!("SELECT value FROM {prefix}configuration WHERE name = 'PS_LANG_DEFAULT'");
    let rows = match channel.query_rows(&sql).await {
        Ok(rows) => rows,
        Err(e) => {
            return Err(Error::SchemaContextMissing {
                what: format!("default language id: {e}"),
            });
        }
    };

    scalar(&rows)
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(|| Error::SchemaContextMissing {
            what: "default language id (PS_LANG_DEFAULT)".to_string(),
        })
}

/// Minimum shop row from the registry; empty or unreadable registries fall
/// back to 1/1.
async fn read_min_shop(channel: &mut dyn DbChannel, prefix: &str) -> (u32, u32) {
    let sql = format!(
        "SELECT id_shop, id_shop_group FROM {prefix}shop ORDER BY id_shop ASC LIMIT 1"
    );
    match channel.query_rows(&sql).await {
        Ok(rows) => {
            let parse = |cell: Option<&Option<String>>| {
                cell.and_then(|c| c.as_deref()).and_then(|v| v.parse().ok())
            };
            let shop = parse(rows.first().and_then(|r| r.first()));
            let group = parse(rows.first().and_then(|r| r.get(1)));
            (shop.unwrap_or(1), group.unwrap_or(1))
        }
        Err(e) => {
            tracing::warn!(error = %e, "shop registry unreadable, assuming shop 1/1");
            (1, 1)
        }
    }
}

fn ensure_prefix(prefix: &str) -> Result<()> {
    if prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "table prefix must contain only [A-Za-z0-9_], got '{prefix}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{row, StubChannel};

    #[tokio::test]
    async fn test_full_resolution_from_live_schema() {
        let mut chan = StubChannel::new();
        chan.push_result(vec![row(&[Some("ps_configuration")])]);
        chan.push_result(vec![row(&[Some("2")])]);
        chan.push_result(vec![row(&[Some("3"), Some("2")])]);

        let ctx = resolve_context(&mut chan, &ContextOverrides::default(), None)
            .await
            .unwrap();
        assert_eq!(ctx.prefix, "ps_");
        assert_eq!(ctx.id_lang, 2);
        assert_eq!(ctx.id_shop, 3);
        assert_eq!(ctx.id_shop_group, 2);
        assert_eq!(ctx.table("product"), "ps_product");
    }

    #[tokio::test]
    async fn test_prefix_inference_is_sorted_first() {
        let mut chan = StubChannel::new();
        chan.push_result(vec![
            row(&[Some("zz_configuration")]),
            row(&[Some("aa_configuration")]),
        ]);
        chan.push_result(vec![row(&[Some("1")])]);
        chan.push_result(vec![]);

        let ctx = resolve_context(&mut chan, &ContextOverrides::default(), None)
            .await
            .unwrap();
        assert_eq!(ctx.prefix, "aa_");
    }

    #[tokio::test]
    async fn test_prefix_falls_back_to_hint_then_default() {
        let mut chan = StubChannel::new();
        chan.push_result(vec![]);
        chan.push_result(vec![row(&[Some("1")])]);
        chan.push_result(vec![]);
        let ctx = resolve_context(&mut chan, &ContextOverrides::default(), Some("shop_"))
            .await
            .unwrap();
        assert_eq!(ctx.prefix, "shop_");

        let mut chan = StubChannel::new();
        chan.push_result(vec![]);
        chan.push_result(vec![row(&[Some("1")])]);
        chan.push_result(vec![]);
        let ctx = resolve_context(&mut chan, &ContextOverrides::default(), None)
            .await
            .unwrap();
        assert_eq!(ctx.prefix, DEFAULT_PREFIX);
    }

    #[tokio::test]
    async fn test_missing_language_is_fatal() {
        let mut chan = StubChannel::new();
        chan.push_result(vec![row(&[Some("ps_configuration")])]);
        chan.push_result(vec![]);

        let err = resolve_context(&mut chan, &ContextOverrides::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaContextMissing { .. }));
    }

    #[tokio::test]
    async fn test_empty_shop_registry_falls_back() {
        let mut chan = StubChannel::new();
        chan.push_result(vec![row(&[Some("ps_configuration")])]);
        chan.push_result(vec![row(&[Some("1")])]);
        chan.push_result(vec![]);

        let ctx = resolve_context(&mut chan, &ContextOverrides::default(), None)
            .await
            .unwrap();
        assert_eq!(ctx.id_shop, 1);
        assert_eq!(ctx.id_shop_group, 1);
    }

    #[tokio::test]
    async fn test_full_overrides_issue_no_queries() {
        let mut chan = StubChannel::new();
        let overrides = ContextOverrides {
            prefix: Some("x_".into()),
            id_lang: Some(5),
            id_shop: Some(2),
            id_shop_group: Some(2),
        };

        let ctx = resolve_context(&mut chan, &overrides, None).await.unwrap();
        assert_eq!(ctx.prefix, "x_");
        assert_eq!(ctx.id_lang, 5);
        assert!(chan.queries.is_empty());
    }

    #[tokio::test]
    async fn test_hostile_prefix_override_rejected() {
        let mut chan = StubChannel::new();
        let overrides = ContextOverrides {
            prefix: Some("ps_`; DROP TABLE".into()),
            id_lang: Some(1),
            id_shop: Some(1),
            id_shop_group: Some(1),
        };

        let err = resolve_context(&mut chan, &overrides, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
