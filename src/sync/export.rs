//! Snapshot export.
//!
//! Reads the live catalog through a [`DbChannel`] and writes one flat file
//! per entity into a snapshot directory.
//!
//! # Determinism
//!
//! Every query carries a total ORDER BY over its natural key, and free-text
//! columns are collapsed server-side (tab, CR and LF become spaces). Two
//! exports of the same catalog produce byte-identical flat files, so
//! snapshots diff cleanly under version control.
//!
//! # Read scope
//!
//! All localized and per-shop reads are pinned to the resolved schema
//! context: one language, one shop. Multi-language and multi-shop stores
//! export the slice the context names.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::channel::DbChannel;
use crate::error::Result;
use crate::schema::SchemaContext;
use crate::sync::file::write_tsv;
use crate::sync::types::{
    CATEGORIES, EntityCounts, EntitySpec, IMAGES, MEMBERSHIPS, PRODUCTS, VARIANTS,
};

/// Exporter for snapshot flat files.
///
/// Borrows an open channel and a resolved schema context, and writes the
/// five entity files into `output_dir`. Archive and manifest handling live
/// with the caller.
pub struct Exporter<'a> {
    channel: &'a mut dyn DbChannel,
    ctx: SchemaContext,
    output_dir: PathBuf,
}

impl<'a> Exporter<'a> {
    /// Create a new exporter writing into `output_dir`.
    #[must_use]
    pub fn new(channel: &'a mut dyn DbChannel, ctx: SchemaContext, output_dir: PathBuf) -> Self {
        Self {
            channel,
            ctx,
            output_dir,
        }
    }

    /// Get the output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Export all five entities as flat files.
    ///
    /// Files are overwritten in place; each write is atomic, so an
    /// interrupted export never leaves a truncated file.
    ///
    /// # Errors
    ///
    /// Returns an error if a query or a file write fails.
    pub async fn export(&mut self) -> Result<EntityCounts> {
        fs::create_dir_all(&self.output_dir)?;

        let queries: [(&EntitySpec, String); 5] = [
            (&PRODUCTS, product_query(&self.ctx)),
            (&VARIANTS, variant_query(&self.ctx)),
            (&CATEGORIES, category_query(&self.ctx)),
            (&MEMBERSHIPS, membership_query(&self.ctx)),
            (&IMAGES, image_query(&self.ctx)),
        ];

        let mut counts = EntityCounts::default();
        for (spec, sql) in queries {
            let rows = self.channel.query_rows(&sql).await?;
            write_tsv(&self.output_dir.join(spec.file_name), spec.columns, &rows)?;
            debug!(entity = spec.name, rows = rows.len(), "flat file written");
            counts.set(spec.name, rows.len() as u64);
        }
        Ok(counts)
    }
}

/// Wrap a free-text column so framing bytes can never reach the flat file.
fn sanitized(expr: &str) -> String {
    format!("REPLACE(REPLACE(REPLACE({expr}, CHAR(9), ' '), CHAR(10), ' '), CHAR(13), ' ')")
}

/// Scalar subquery picking the stock row for one product/variant.
///
/// Stock rows are scoped either to the shop (`id_shop`, group 0) or shared
/// across the group (shop 0, `id_shop_group`). The shop-specific row wins
/// when both exist.
fn stock_quantity(ctx: &SchemaContext, product: &str, attribute: &str) -> String {
    format!(
        "(SELECT sa.quantity FROM {sa} sa \
         WHERE sa.id_product = {product} AND sa.id_product_attribute = {attribute} \
         AND ((sa.id_shop = {shop} AND sa.id_shop_group = 0) \
         OR (sa.id_shop = 0 AND sa.id_shop_group = {group})) \
         ORDER BY sa.id_shop DESC LIMIT 1)",
        sa = ctx.table("stock_available"),
        shop = ctx.id_shop,
        group = ctx.id_shop_group,
    )
}

pub(crate) fn product_query(ctx: &SchemaContext) -> String {
    let name = sanitized("pl.name");
    let default_category = format!(
        "(SELECT {name} FROM {cl} cl \
         WHERE cl.id_category = ps.id_category_default \
         AND cl.id_lang = {lang} AND cl.id_shop = {shop} LIMIT 1)",
        name = sanitized("cl.name"),
        cl = ctx.table("category_lang"),
        lang = ctx.id_lang,
        shop = ctx.id_shop,
    );
    let quantity = stock_quantity(ctx, "p.id_product", "0");

    format!(
        "SELECT p.id_product, p.reference, {name}, ps.price, {quantity}, ps.active, \
         {default_category}, p.ean13, p.upc, p.isbn, ps.visibility, p.date_add, p.date_upd \
         FROM {product} p \
         JOIN {product_shop} ps ON ps.id_product = p.id_product AND ps.id_shop = {shop} \
         LEFT JOIN {product_lang} pl ON pl.id_product = p.id_product \
         AND pl.id_lang = {lang} AND pl.id_shop = {shop} \
         ORDER BY p.id_product",
        product = ctx.table("product"),
        product_shop = ctx.table("product_shop"),
        product_lang = ctx.table("product_lang"),
        shop = ctx.id_shop,
        lang = ctx.id_lang,
    )
}

pub(crate) fn variant_query(ctx: &SchemaContext) -> String {
    let combination = format!(
        "(SELECT GROUP_CONCAT(CONCAT({group_name}, ': ', {attr_name}) \
         ORDER BY a.id_attribute_group, a.id_attribute SEPARATOR ', ') \
         FROM {pac} pac \
         JOIN {attribute} a ON a.id_attribute = pac.id_attribute \
         JOIN {attribute_lang} al ON al.id_attribute = a.id_attribute AND al.id_lang = {lang} \
         JOIN {group_lang} agl ON agl.id_attribute_group = a.id_attribute_group \
         AND agl.id_lang = {lang} \
         WHERE pac.id_product_attribute = pa.id_product_attribute)",
        group_name = sanitized("agl.name"),
        attr_name = sanitized("al.name"),
        pac = ctx.table("product_attribute_combination"),
        attribute = ctx.table("attribute"),
        attribute_lang = ctx.table("attribute_lang"),
        group_lang = ctx.table("attribute_group_lang"),
        lang = ctx.id_lang,
    );
    let quantity = stock_quantity(ctx, "pa.id_product", "pa.id_product_attribute");

    format!(
        "SELECT pa.id_product_attribute, pa.id_product, {combination}, pa.reference, \
         pas.price, pas.weight, {quantity}, pa.ean13, pa.upc \
         FROM {pa} pa \
         JOIN {pas} pas ON pas.id_product_attribute = pa.id_product_attribute \
         AND pas.id_shop = {shop} \
         ORDER BY pa.id_product_attribute",
        pa = ctx.table("product_attribute"),
        pas = ctx.table("product_attribute_shop"),
        shop = ctx.id_shop,
    )
}

pub(crate) fn category_query(ctx: &SchemaContext) -> String {
    format!(
        "SELECT c.id_category, {name}, c.id_parent, c.active, c.position \
         FROM {category} c \
         LEFT JOIN {category_lang} cl ON cl.id_category = c.id_category \
         AND cl.id_lang = {lang} AND cl.id_shop = {shop} \
         ORDER BY c.id_category",
        name = sanitized("cl.name"),
        category = ctx.table("category"),
        category_lang = ctx.table("category_lang"),
        lang = ctx.id_lang,
        shop = ctx.id_shop,
    )
}

pub(crate) fn membership_query(ctx: &SchemaContext) -> String {
    format!(
        "SELECT cp.id_product, cp.id_category FROM {cp} cp \
         ORDER BY cp.id_product, cp.id_category",
        cp = ctx.table("category_product"),
    )
}

pub(crate) fn image_query(ctx: &SchemaContext) -> String {
    format!(
        "SELECT i.id_image, i.id_product, i.cover, i.position FROM {image} i \
         ORDER BY i.id_product, i.position, i.id_image",
        image = ctx.table("image"),
    )
}
