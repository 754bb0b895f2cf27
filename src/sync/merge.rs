//! Staging DDL and the merge statement sequence.
//!
//! An import stages every flat file into connection-scoped temporary
//! tables, then runs a fixed sequence of merge statements against the live
//! schema. Merges only ever join rows that already exist; the only inserts
//! in the sequence target memberships (replaced as a set) and stock rows
//! (the designated upsert), never the catalog entities themselves.
//!
//! Staged non-key cells are nullable text, and the two load paths differ
//! in how they spell absence (`NULL` vs `''`). Every consumer therefore
//! goes through `NULLIF(col, '')` so both spellings behave identically.

use crate::schema::SchemaContext;
use crate::sync::types::EntitySpec;

/// Statements that prepare one entity's staging table.
pub(crate) fn staging_statements(spec: &EntitySpec) -> [String; 2] {
    [
        format!("DROP TEMPORARY TABLE IF EXISTS {}", spec.staging_table),
        staging_ddl(spec),
    ]
}

/// CREATE TEMPORARY TABLE for one entity.
///
/// Natural-key columns are integral (the loader validated them); all other
/// cells stay text so values survive the round trip unchanged.
pub(crate) fn staging_ddl(spec: &EntitySpec) -> String {
    let mut columns = Vec::with_capacity(spec.columns.len());
    for (idx, name) in spec.columns.iter().enumerate() {
        let ty = if spec.key.contains(&idx) {
            "INT UNSIGNED NOT NULL"
        } else if *name == "combination" {
            "TEXT NULL"
        } else {
            "VARCHAR(255) NULL"
        };
        columns.push(format!("`{name}` {ty}"));
    }
    let pk = spec
        .key
        .iter()
        .map(|&idx| format!("`{}`", spec.columns[idx]))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "CREATE TEMPORARY TABLE {table} ({columns}, PRIMARY KEY ({pk})) \
         ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        table = spec.staging_table,
        columns = columns.join(", "),
    )
}

/// The full merge sequence, in execution order.
///
/// Products first (scalars, shop mirror, name, default category, stock),
/// then categories, memberships, variants and their stock, and finally
/// image metadata.
pub(crate) fn merge_statements(ctx: &SchemaContext) -> Vec<String> {
    vec![
        product_scalar_merge(ctx),
        product_shop_mirror(ctx),
        product_name_overwrite(ctx),
        product_default_category(ctx),
        product_shop_default_category(ctx),
        product_stock_upsert(ctx),
        category_scalar_merge(ctx),
        category_name_overwrite(ctx),
        membership_delete(ctx),
        membership_insert(ctx),
        variant_scalar_merge(ctx),
        variant_shop_mirror(ctx),
        variant_stock_upsert(ctx),
        image_position_merge(ctx),
        image_cover_clear(ctx),
        image_cover_set(ctx),
        image_shop_cover_clear(ctx),
        image_shop_cover_set(ctx),
    ]
}

/// `COALESCE(NULLIF(staged, ''), live)`: empty snapshot cells leave the
/// live value untouched.
fn keep_live(staged: &str, live: &str) -> String {
    format!("{live} = COALESCE(NULLIF({staged}, ''), {live})")
}

/// Scalar subquery resolving a localized category name to the smallest
/// matching category id.
fn category_id_by_name(ctx: &SchemaContext, name_expr: &str) -> String {
    format!(
        "(SELECT MIN(c.id_category) FROM {cl} c \
         WHERE c.name = {name_expr} AND c.id_lang = {lang} AND c.id_shop = {shop})",
        cl = ctx.table("category_lang"),
        lang = ctx.id_lang,
        shop = ctx.id_shop,
    )
}

fn product_scalar_merge(ctx: &SchemaContext) -> String {
    let sets = [
        keep_live("s.reference", "p.reference"),
        keep_live("s.price_tax_excl", "p.price"),
        keep_live("s.active", "p.active"),
        keep_live("s.ean13", "p.ean13"),
        keep_live("s.upc", "p.upc"),
        keep_live("s.isbn", "p.isbn"),
        keep_live("s.visibility", "p.visibility"),
        keep_live("s.date_add", "p.date_add"),
        keep_live("s.date_upd", "p.date_upd"),
    ];
    format!(
        "UPDATE {product} p JOIN stg_products s ON s.id_product = p.id_product SET {sets}",
        product = ctx.table("product"),
        sets = sets.join(", "),
    )
}

fn product_shop_mirror(ctx: &SchemaContext) -> String {
    let sets = [
        keep_live("s.price_tax_excl", "ps.price"),
        keep_live("s.active", "ps.active"),
        keep_live("s.visibility", "ps.visibility"),
    ];
    format!(
        "UPDATE {product_shop} ps JOIN stg_products s ON s.id_product = ps.id_product \
         SET {sets} WHERE ps.id_shop = {shop}",
        product_shop = ctx.table("product_shop"),
        sets = sets.join(", "),
        shop = ctx.id_shop,
    )
}

fn product_name_overwrite(ctx: &SchemaContext) -> String {
    // Names are authoritative in the snapshot: an empty cell blanks the
    // live name instead of keeping it.
    format!(
        "UPDATE {product_lang} pl JOIN stg_products s ON s.id_product = pl.id_product \
         SET pl.name = COALESCE(s.name, '') \
         WHERE pl.id_lang = {lang} AND pl.id_shop = {shop}",
        product_lang = ctx.table("product_lang"),
        lang = ctx.id_lang,
        shop = ctx.id_shop,
    )
}

fn product_default_category(ctx: &SchemaContext) -> String {
    let resolved = category_id_by_name(ctx, "s.default_category");
    format!(
        "UPDATE {product} p JOIN stg_products s ON s.id_product = p.id_product \
         SET p.id_category_default = {resolved} \
         WHERE NULLIF(s.default_category, '') IS NOT NULL AND {resolved} IS NOT NULL",
        product = ctx.table("product"),
    )
}

fn product_shop_default_category(ctx: &SchemaContext) -> String {
    let resolved = category_id_by_name(ctx, "s.default_category");
    format!(
        "UPDATE {product_shop} ps JOIN stg_products s ON s.id_product = ps.id_product \
         SET ps.id_category_default = {resolved} \
         WHERE ps.id_shop = {shop} \
         AND NULLIF(s.default_category, '') IS NOT NULL AND {resolved} IS NOT NULL",
        product_shop = ctx.table("product_shop"),
        shop = ctx.id_shop,
    )
}

fn category_scalar_merge(ctx: &SchemaContext) -> String {
    let sets = [
        keep_live("s.id_parent", "c.id_parent"),
        keep_live("s.active", "c.active"),
        keep_live("s.position", "c.position"),
    ];
    format!(
        "UPDATE {category} c JOIN stg_categories s ON s.id_category = c.id_category SET {sets}",
        category = ctx.table("category"),
        sets = sets.join(", "),
    )
}

fn category_name_overwrite(ctx: &SchemaContext) -> String {
    format!(
        "UPDATE {category_lang} cl JOIN stg_categories s ON s.id_category = cl.id_category \
         SET cl.name = COALESCE(s.name, '') \
         WHERE cl.id_lang = {lang} AND cl.id_shop = {shop}",
        category_lang = ctx.table("category_lang"),
        lang = ctx.id_lang,
        shop = ctx.id_shop,
    )
}

fn membership_delete(ctx: &SchemaContext) -> String {
    format!(
        "DELETE cp FROM {category_product} cp \
         WHERE cp.id_product IN (SELECT DISTINCT s.id_product FROM stg_product_categories s)",
        category_product = ctx.table("category_product"),
    )
}

fn membership_insert(ctx: &SchemaContext) -> String {
    // Positions are re-derived deterministically: products rank densely
    // within each category by ascending id, starting at zero. A window
    // function keeps this to a single pass over the staging table, which
    // MySQL requires anyway (a TEMPORARY table cannot appear twice in one
    // statement).
    format!(
        "INSERT INTO {category_product} (id_category, id_product, position) \
         SELECT s.id_category, s.id_product, \
         ROW_NUMBER() OVER (PARTITION BY s.id_category ORDER BY s.id_product) - 1 \
         FROM stg_product_categories s",
        category_product = ctx.table("category_product"),
    )
}

fn variant_scalar_merge(ctx: &SchemaContext) -> String {
    let sets = [
        keep_live("s.reference", "pa.reference"),
        keep_live("s.price_impact", "pa.price"),
        keep_live("s.weight", "pa.weight"),
        keep_live("s.ean13", "pa.ean13"),
        keep_live("s.upc", "pa.upc"),
    ];
    format!(
        "UPDATE {pa} pa JOIN stg_variants s \
         ON s.id_product_attribute = pa.id_product_attribute SET {sets}",
        pa = ctx.table("product_attribute"),
        sets = sets.join(", "),
    )
}

fn variant_shop_mirror(ctx: &SchemaContext) -> String {
    let sets = [
        keep_live("s.price_impact", "pas.price"),
        keep_live("s.weight", "pas.weight"),
    ];
    format!(
        "UPDATE {pas} pas JOIN stg_variants s \
         ON s.id_product_attribute = pas.id_product_attribute \
         SET {sets} WHERE pas.id_shop = {shop}",
        pas = ctx.table("product_attribute_shop"),
        sets = sets.join(", "),
        shop = ctx.id_shop,
    )
}

fn product_stock_upsert(ctx: &SchemaContext) -> String {
    // The designated upsert: quantities land on the shop-specific stock
    // row (shop, group 0), created when absent, overwritten when present.
    // An empty staged quantity counts as zero.
    format!(
        "INSERT INTO {sa} \
         (id_product, id_product_attribute, id_shop, id_shop_group, quantity, \
         depends_on_stock, out_of_stock) \
         SELECT dt.id_product, 0, {shop}, 0, dt.qty, 0, 2 \
         FROM (SELECT s.id_product AS id_product, \
         COALESCE(NULLIF(s.quantity, ''), 0) AS qty FROM stg_products s) dt \
         ON DUPLICATE KEY UPDATE quantity = dt.qty",
        sa = ctx.table("stock_available"),
        shop = ctx.id_shop,
    )
}

fn variant_stock_upsert(ctx: &SchemaContext) -> String {
    // Same rule keyed by variant. Rows with no owning product cannot
    // address a stock row and are left out.
    format!(
        "INSERT INTO {sa} \
         (id_product, id_product_attribute, id_shop, id_shop_group, quantity, \
         depends_on_stock, out_of_stock) \
         SELECT dt.id_product, dt.id_product_attribute, {shop}, 0, dt.qty, 0, 2 \
         FROM (SELECT NULLIF(s.id_product, '') AS id_product, \
         s.id_product_attribute AS id_product_attribute, \
         COALESCE(NULLIF(s.quantity, ''), 0) AS qty FROM stg_variants s \
         WHERE NULLIF(s.id_product, '') IS NOT NULL) dt \
         ON DUPLICATE KEY UPDATE quantity = dt.qty",
        sa = ctx.table("stock_available"),
        shop = ctx.id_shop,
    )
}

fn image_position_merge(ctx: &SchemaContext) -> String {
    format!(
        "UPDATE {image} i JOIN stg_images s ON s.id_image = i.id_image \
         SET {set}",
        image = ctx.table("image"),
        set = keep_live("s.position", "i.position"),
    )
}

/// Products touched by the staged image set, derived from the live image
/// table so the statement works even when the snapshot leaves
/// `id_product` blank.
fn staged_products_from_images(ctx: &SchemaContext) -> String {
    format!(
        "(SELECT DISTINCT i2.id_product FROM {image} i2 \
         JOIN stg_images s ON s.id_image = i2.id_image) touched",
        image = ctx.table("image"),
    )
}

fn image_cover_clear(ctx: &SchemaContext) -> String {
    format!(
        "UPDATE {image} i JOIN {touched} ON touched.id_product = i.id_product \
         SET i.cover = NULL",
        image = ctx.table("image"),
        touched = staged_products_from_images(ctx),
    )
}

fn image_cover_set(ctx: &SchemaContext) -> String {
    format!(
        "UPDATE {image} i JOIN stg_images s ON s.id_image = i.id_image \
         SET i.cover = 1 WHERE s.cover = '1'",
        image = ctx.table("image"),
    )
}

fn image_shop_cover_clear(ctx: &SchemaContext) -> String {
    format!(
        "UPDATE {image_shop} ish JOIN {image} i ON i.id_image = ish.id_image \
         JOIN {touched} ON touched.id_product = i.id_product \
         SET ish.cover = NULL WHERE ish.id_shop = {shop}",
        image_shop = ctx.table("image_shop"),
        image = ctx.table("image"),
        touched = staged_products_from_images(ctx),
        shop = ctx.id_shop,
    )
}

fn image_shop_cover_set(ctx: &SchemaContext) -> String {
    format!(
        "UPDATE {image_shop} ish JOIN stg_images s ON s.id_image = ish.id_image \
         SET ish.cover = 1 WHERE ish.id_shop = {shop} AND s.cover = '1'",
        image_shop = ctx.table("image_shop"),
        shop = ctx.id_shop,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::types::{CATEGORIES, MEMBERSHIPS, PRODUCTS, VARIANTS};

    fn context() -> SchemaContext {
        SchemaContext {
            prefix: "ps_".to_string(),
            id_lang: 1,
            id_shop: 1,
            id_shop_group: 1,
        }
    }

    #[test]
    fn test_staging_ddl_shape() {
        let ddl = staging_ddl(&PRODUCTS);
        assert!(ddl.starts_with("CREATE TEMPORARY TABLE stg_products"));
        assert!(ddl.contains("`id_product` INT UNSIGNED NOT NULL"));
        assert!(ddl.contains("`reference` VARCHAR(255) NULL"));
        assert!(ddl.contains("PRIMARY KEY (`id_product`)"));

        let ddl = staging_ddl(&MEMBERSHIPS);
        assert!(ddl.contains("PRIMARY KEY (`id_product`, `id_category`)"));

        let ddl = staging_ddl(&VARIANTS);
        assert!(ddl.contains("`combination` TEXT NULL"));
    }

    #[test]
    fn test_staging_statements_drop_then_create() {
        let [drop, create] = staging_statements(&CATEGORIES);
        assert_eq!(drop, "DROP TEMPORARY TABLE IF EXISTS stg_categories");
        assert!(create.starts_with("CREATE TEMPORARY TABLE stg_categories"));
    }

    #[test]
    fn test_merge_sequence_order() {
        let plan = merge_statements(&context());
        assert_eq!(plan.len(), 18);

        let index_of = |needle: &str| {
            plan.iter()
                .position(|sql| sql.contains(needle))
                .unwrap_or_else(|| panic!("no statement contains '{needle}'"))
        };

        assert!(plan[0].starts_with("UPDATE ps_product p"));
        // Product stock lands before the category merges, variant stock
        // after the variant merges.
        assert!(
            index_of("SELECT dt.id_product, 0, 1, 0, dt.qty") < index_of("JOIN stg_categories")
        );
        assert!(
            index_of("JOIN stg_variants") < index_of("dt.id_product_attribute, 1, 0, dt.qty")
        );
        assert!(index_of("DELETE cp FROM") < index_of("INSERT INTO ps_category_product"));
        assert!(index_of("SET i.cover = NULL") < index_of("SET i.cover = 1"));
        assert!(index_of("SET ish.cover = NULL") < index_of("SET ish.cover = 1"));
    }

    #[test]
    fn test_empty_cells_keep_live_values() {
        let sql = product_scalar_merge(&context());
        assert!(sql.contains("p.reference = COALESCE(NULLIF(s.reference, ''), p.reference)"));
        assert!(sql.contains("p.price = COALESCE(NULLIF(s.price_tax_excl, ''), p.price)"));
        assert!(sql.contains("p.date_upd = COALESCE(NULLIF(s.date_upd, ''), p.date_upd)"));
    }

    #[test]
    fn test_name_overwrite_allows_blanking() {
        let sql = product_name_overwrite(&context());
        assert!(sql.contains("SET pl.name = COALESCE(s.name, '')"));
        assert!(!sql.contains("NULLIF(s.name"));

        let sql = category_name_overwrite(&context());
        assert!(sql.contains("SET cl.name = COALESCE(s.name, '')"));
    }

    #[test]
    fn test_default_category_is_guarded() {
        let sql = product_default_category(&context());
        assert!(sql.contains("MIN(c.id_category)"));
        assert!(sql.contains("WHERE NULLIF(s.default_category, '') IS NOT NULL"));
        // Unresolvable names must not null the live default.
        assert!(sql.trim_end().ends_with("IS NOT NULL"));
    }

    #[test]
    fn test_membership_positions_rank_by_product_id() {
        let sql = membership_insert(&context());
        assert!(sql.contains("ROW_NUMBER() OVER (PARTITION BY s.id_category ORDER BY s.id_product) - 1"));
        // One reference to the staging table; MySQL cannot reopen it.
        assert_eq!(sql.matches("stg_product_categories").count(), 1);
    }

    #[test]
    fn test_stock_upserts_target_shop_scope() {
        let product = product_stock_upsert(&context());
        assert!(product.contains("INSERT INTO ps_stock_available"));
        assert!(product.contains("SELECT dt.id_product, 0, 1, 0, dt.qty"));
        assert!(product.contains("ON DUPLICATE KEY UPDATE quantity = dt.qty"));
        // Empty staged quantities overwrite with zero, they are not skipped.
        assert!(product.contains("COALESCE(NULLIF(s.quantity, ''), 0)"));
        assert!(!product.contains("NULLIF(s.quantity, '') IS NOT NULL"));

        let variant = variant_stock_upsert(&context());
        assert!(variant.contains("SELECT dt.id_product, dt.id_product_attribute, 1, 0, dt.qty"));
        assert!(variant.contains("COALESCE(NULLIF(s.quantity, ''), 0)"));
        // A variant row without its owning product has no stock key.
        assert!(variant.contains("WHERE NULLIF(s.id_product, '') IS NOT NULL"));
    }

    #[test]
    fn test_only_memberships_and_stock_insert() {
        for sql in merge_statements(&context()) {
            if sql.starts_with("INSERT") {
                assert!(
                    sql.contains("ps_category_product") || sql.contains("ps_stock_available"),
                    "unexpected insert target: {sql}"
                );
            }
        }
    }

    #[test]
    fn test_statements_respect_schema_context() {
        let ctx = SchemaContext {
            prefix: "shop1_".to_string(),
            id_lang: 2,
            id_shop: 3,
            id_shop_group: 9,
        };
        for sql in merge_statements(&ctx) {
            assert!(!sql.contains("ps_"), "default prefix leaked into: {sql}");
        }
        assert!(product_name_overwrite(&ctx).contains("pl.id_lang = 2"));
        assert!(product_stock_upsert(&ctx).contains("0, 3, 0, dt.qty"));
        assert!(variant_stock_upsert(&ctx).contains("dt.id_product_attribute, 3, 0"));
    }
}
