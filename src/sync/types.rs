//! Shared types for snapshot export/import.
//!
//! The five catalog entities are described declaratively: flat-file name,
//! staging table, column list, natural key. Both directions of the sync are
//! driven off these descriptors so the snapshot layout is defined in exactly
//! one place.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::channel::TextRow;
use crate::error::{Error, Result};

/// One catalog entity's flat-file and staging shape.
#[derive(Debug, Clone, Copy)]
pub struct EntitySpec {
    /// Entity name used in stats and log lines.
    pub name: &'static str,
    /// Flat-file name inside a snapshot directory.
    pub file_name: &'static str,
    /// Connection-scoped staging table the file is loaded into.
    pub staging_table: &'static str,
    /// Header columns, in file order.
    pub columns: &'static [&'static str],
    /// Column indices forming the natural key: non-empty, integral, unique.
    pub key: &'static [usize],
    /// Additional columns that must parse as integers when present.
    pub int_columns: &'static [usize],
}

pub const PRODUCTS: EntitySpec = EntitySpec {
    name: "products",
    file_name: "products.tsv",
    staging_table: "stg_products",
    columns: &[
        "id_product",
        "reference",
        "name",
        "price_tax_excl",
        "quantity",
        "active",
        "default_category",
        "ean13",
        "upc",
        "isbn",
        "visibility",
        "date_add",
        "date_upd",
    ],
    key: &[0],
    int_columns: &[],
};

pub const VARIANTS: EntitySpec = EntitySpec {
    name: "variants",
    file_name: "variants.tsv",
    staging_table: "stg_variants",
    columns: &[
        "id_product_attribute",
        "id_product",
        "combination",
        "reference",
        "price_impact",
        "weight",
        "quantity",
        "ean13",
        "upc",
    ],
    key: &[0],
    int_columns: &[1],
};

pub const CATEGORIES: EntitySpec = EntitySpec {
    name: "categories",
    file_name: "categories.tsv",
    staging_table: "stg_categories",
    columns: &["id_category", "name", "id_parent", "active", "position"],
    key: &[0],
    int_columns: &[2],
};

pub const MEMBERSHIPS: EntitySpec = EntitySpec {
    name: "memberships",
    file_name: "product_categories.tsv",
    staging_table: "stg_product_categories",
    columns: &["id_product", "id_category"],
    key: &[0, 1],
    int_columns: &[],
};

pub const IMAGES: EntitySpec = EntitySpec {
    name: "images",
    file_name: "images.tsv",
    staging_table: "stg_images",
    columns: &["id_image", "id_product", "cover", "position"],
    key: &[0],
    int_columns: &[1],
};

/// All entities, in snapshot-layout order.
pub const ENTITIES: [EntitySpec; 5] = [PRODUCTS, VARIANTS, CATEGORIES, MEMBERSHIPS, IMAGES];

/// Structural validation of parsed rows against an entity descriptor.
///
/// Key cells must be present, integral, and unique across the file; declared
/// integer columns must parse when non-empty. Everything else is carried
/// through verbatim. Line numbers are 1-based and count the header line.
///
/// # Errors
///
/// Returns [`Error::LoadFailure`] naming the file and line of the first
/// offending row.
pub fn validate_rows(spec: &EntitySpec, rows: &[TextRow]) -> Result<()> {
    let mut seen: HashSet<Vec<u32>> = HashSet::with_capacity(rows.len());

    for (idx, row) in rows.iter().enumerate() {
        let line = (idx + 2) as u64;
        let fail = |message: String| Error::LoadFailure {
            file: spec.file_name.to_string(),
            line,
            message,
        };

        let mut key = Vec::with_capacity(spec.key.len());
        for &col in spec.key {
            let cell = row.get(col).and_then(|c| c.as_deref()).unwrap_or("");
            let id: u32 = cell.parse().map_err(|_| {
                fail(format!(
                    "column '{}' must be a positive integer, got '{cell}'",
                    spec.columns[col]
                ))
            })?;
            key.push(id);
        }
        if !seen.insert(key) {
            return Err(fail(format!(
                "duplicate {} key",
                spec.columns[spec.key[0]]
            )));
        }

        for &col in spec.int_columns {
            if let Some(cell) = row.get(col).and_then(|c| c.as_deref()) {
                if !cell.is_empty() && cell.parse::<u32>().is_err() {
                    return Err(fail(format!(
                        "column '{}' must be an integer when present, got '{cell}'",
                        spec.columns[col]
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Row counts per entity.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    /// Number of product rows.
    pub products: u64,
    /// Number of variant rows.
    pub variants: u64,
    /// Number of category rows.
    pub categories: u64,
    /// Number of product-to-category membership rows.
    pub memberships: u64,
    /// Number of image metadata rows.
    pub images: u64,
}

impl EntityCounts {
    /// Sets the counter named by an [`EntitySpec::name`].
    pub fn set(&mut self, entity: &str, count: u64) {
        match entity {
            "products" => self.products = count,
            "variants" => self.variants = count,
            "categories" => self.categories = count,
            "memberships" => self.memberships = count,
            "images" => self.images = count,
            _ => {}
        }
    }

    /// Reads the counter named by an [`EntitySpec::name`].
    #[must_use]
    pub fn get(&self, entity: &str) -> u64 {
        match entity {
            "products" => self.products,
            "variants" => self.variants,
            "categories" => self.categories,
            "memberships" => self.memberships,
            "images" => self.images,
            _ => 0,
        }
    }

    /// Total rows across all entities.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.products + self.variants + self.categories + self.memberships + self.images
    }
}

/// Outcome of one export run.
#[derive(Debug, Serialize)]
pub struct ExportReport {
    /// Directory the snapshot was written to.
    pub snapshot_dir: std::path::PathBuf,
    /// Rows written per entity.
    pub counts: EntityCounts,
    /// Whether an image archive was produced.
    pub assets_archived: bool,
}

/// Outcome of one import run.
#[derive(Debug, Serialize)]
pub struct ImportReport {
    /// Directory the snapshot was read from.
    pub snapshot_dir: std::path::PathBuf,
    /// Rows staged per entity.
    pub staged: EntityCounts,
    /// True when the run planned the merge without touching the database.
    pub dry_run: bool,
    /// Whether the image archive was unpacked.
    pub assets_restored: bool,
    /// Non-fatal problems surfaced to the caller.
    pub warnings: Vec<String>,
}
