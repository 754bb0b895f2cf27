//! Snapshot import.
//!
//! Importing is a strict pipeline: the snapshot is loaded and validated
//! entirely on the client, a transaction plan is assembled (staging DDL,
//! bulk loads, then the merge sequence), and the whole plan runs through
//! the channel as one all-or-nothing transaction. No database work starts
//! until every row has passed validation, so a malformed snapshot can
//! never leave the catalog half-merged.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::channel::{DbChannel, TableLoad, TextRow, TxStep};
use crate::error::Result;
use crate::schema::SchemaContext;
use crate::snapshot::{self, Manifest};
use crate::sync::file::read_tsv;
use crate::sync::merge::{merge_statements, staging_statements};
use crate::sync::types::{ENTITIES, EntityCounts, EntitySpec, validate_rows};

/// A fully loaded, validated snapshot ready to be planned.
#[derive(Debug)]
pub struct Snapshot {
    /// Directory the snapshot was read from.
    pub dir: PathBuf,
    /// Parsed rows per entity, in layout order.
    pub entities: Vec<(EntitySpec, Vec<TextRow>)>,
    /// Manifest, when the snapshot carries one.
    pub manifest: Option<Manifest>,
    /// Rows read per entity.
    pub counts: EntityCounts,
}

/// Load a snapshot directory and validate everything up front.
///
/// Checks the directory layout, verifies the manifest digests when a
/// manifest is present, then parses and structurally validates every flat
/// file. Needs no database connection, so callers can reject a bad
/// snapshot before any channel is resolved.
///
/// # Errors
///
/// Returns [`Error::IncompleteSnapshot`], [`Error::SnapshotCorrupt`] or
/// [`Error::LoadFailure`] depending on what is wrong with the directory.
///
/// [`Error::IncompleteSnapshot`]: crate::error::Error::IncompleteSnapshot
/// [`Error::SnapshotCorrupt`]: crate::error::Error::SnapshotCorrupt
/// [`Error::LoadFailure`]: crate::error::Error::LoadFailure
pub fn load_snapshot(dir: &Path) -> Result<Snapshot> {
    snapshot::validate_dir(dir)?;

    let manifest = snapshot::read_manifest(dir)?;
    if let Some(manifest) = &manifest {
        snapshot::verify_manifest(dir, manifest)?;
        debug!("manifest digests verified");
    }

    let mut entities = Vec::with_capacity(ENTITIES.len());
    let mut counts = EntityCounts::default();
    for spec in &ENTITIES {
        let rows = read_tsv(&dir.join(spec.file_name), spec.columns)?;
        validate_rows(spec, &rows)?;
        debug!(entity = spec.name, rows = rows.len(), "flat file validated");
        counts.set(spec.name, rows.len() as u64);
        entities.push((*spec, rows));
    }

    Ok(Snapshot {
        dir: dir.to_path_buf(),
        entities,
        manifest,
        counts,
    })
}

/// Assemble the transaction plan for a loaded snapshot.
///
/// Per entity: drop any stale staging table, create a fresh one, load the
/// rows. Then the fixed merge sequence. The channel wraps the whole plan
/// in one transaction with foreign key checks suspended.
#[must_use]
pub fn build_plan(ctx: &SchemaContext, snapshot: Snapshot) -> Vec<TxStep> {
    let dir = snapshot.dir;
    let mut steps = Vec::new();

    for (spec, rows) in snapshot.entities {
        let [drop, create] = staging_statements(&spec);
        steps.push(TxStep::Statement(drop));
        steps.push(TxStep::Statement(create));
        steps.push(TxStep::Load(TableLoad {
            table: spec.staging_table.to_string(),
            columns: spec.columns,
            path: dir.join(spec.file_name),
            rows,
        }));
    }

    for sql in merge_statements(ctx) {
        steps.push(TxStep::Statement(sql));
    }
    steps
}

/// Importer for catalog snapshots.
///
/// Borrows an open channel and a resolved schema context. Asset restore is
/// not part of the importer: it runs after the database transaction has
/// committed and is owned by the caller.
pub struct Importer<'a> {
    channel: &'a mut dyn DbChannel,
    ctx: SchemaContext,
}

impl<'a> Importer<'a> {
    /// Create a new importer.
    #[must_use]
    pub fn new(channel: &'a mut dyn DbChannel, ctx: SchemaContext) -> Self {
        Self { channel, ctx }
    }

    /// Plan the merge without touching the database.
    #[must_use]
    pub fn plan(&self, snapshot: Snapshot) -> Vec<TxStep> {
        build_plan(&self.ctx, snapshot)
    }

    /// Run the merge as a single transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; the channel rolls back,
    /// so the live catalog is unchanged.
    pub async fn import(&mut self, snapshot: Snapshot) -> Result<EntityCounts> {
        let counts = snapshot.counts.clone();
        let steps = build_plan(&self.ctx, snapshot);
        debug!(steps = steps.len(), "merge transaction assembled");
        self.channel.run_transaction(steps).await?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::StubChannel;
    use crate::error::Error;
    use std::fs;
    use tempfile::TempDir;

    fn context() -> SchemaContext {
        SchemaContext {
            prefix: "ps_".to_string(),
            id_lang: 1,
            id_shop: 1,
            id_shop_group: 1,
        }
    }

    fn write_snapshot(dir: &Path) {
        for spec in &ENTITIES {
            let header = spec.columns.join("\t");
            let row = match spec.name {
                "products" => "1\tSKU-1\tWidget\t9.99\t4\t1\tTools\t\t\t\tboth\t\t",
                "variants" => "2\t1\tColor: Red\tSKU-1-R\t0.00\t0.10\t2\t\t",
                "categories" => "3\tTools\t2\t1\t0",
                "memberships" => "1\t3",
                "images" => "5\t1\t1\t0",
                other => panic!("unknown entity {other}"),
            };
            fs::write(dir.join(spec.file_name), format!("{header}\n{row}\n")).unwrap();
        }
    }

    #[test]
    fn test_load_snapshot_counts_rows() {
        let temp_dir = TempDir::new().unwrap();
        write_snapshot(temp_dir.path());

        let snapshot = load_snapshot(temp_dir.path()).unwrap();
        assert_eq!(snapshot.counts.total(), 5);
        assert_eq!(snapshot.counts.products, 1);
        assert!(snapshot.manifest.is_none());
        assert_eq!(snapshot.entities.len(), 5);
    }

    #[test]
    fn test_load_snapshot_rejects_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let err = load_snapshot(temp_dir.path()).unwrap_err();
        assert!(matches!(err, Error::IncompleteSnapshot { .. }));
    }

    #[test]
    fn test_load_snapshot_rejects_malformed_row() {
        let temp_dir = TempDir::new().unwrap();
        write_snapshot(temp_dir.path());
        fs::write(
            temp_dir.path().join("product_categories.tsv"),
            "id_product\tid_category\n1\t3\nabc\t4\n",
        )
        .unwrap();

        let err = load_snapshot(temp_dir.path()).unwrap_err();
        match err {
            Error::LoadFailure { file, line, .. } => {
                assert_eq!(file, "product_categories.tsv");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_load_snapshot_verifies_manifest() {
        let temp_dir = TempDir::new().unwrap();
        write_snapshot(temp_dir.path());

        let manifest = Manifest::build(
            temp_dir.path(),
            "db:test",
            &context(),
            EntityCounts::default(),
        )
        .unwrap();
        snapshot::write_manifest(temp_dir.path(), &manifest).unwrap();

        // Clean snapshot passes with the manifest attached.
        let loaded = load_snapshot(temp_dir.path()).unwrap();
        assert!(loaded.manifest.is_some());

        // Tampering after export is caught before any parsing.
        fs::write(temp_dir.path().join("images.tsv"), "id_image\n").unwrap();
        let err = load_snapshot(temp_dir.path()).unwrap_err();
        match err {
            Error::SnapshotCorrupt { file } => assert_eq!(file, "images.tsv"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plan_stages_then_merges() {
        let temp_dir = TempDir::new().unwrap();
        write_snapshot(temp_dir.path());
        let snapshot = load_snapshot(temp_dir.path()).unwrap();

        let steps = build_plan(&context(), snapshot);
        // Five entities at three steps each, then the merge sequence.
        assert_eq!(steps.len(), 5 * 3 + 18);

        let last_load = steps
            .iter()
            .rposition(|s| matches!(s, TxStep::Load(_)))
            .unwrap();
        let first_merge = steps
            .iter()
            .position(|s| matches!(s, TxStep::Statement(sql) if sql.starts_with("UPDATE")))
            .unwrap();
        assert!(last_load < first_merge);

        match &steps[0] {
            TxStep::Statement(sql) => {
                assert_eq!(sql, "DROP TEMPORARY TABLE IF EXISTS stg_products");
            }
            step => panic!("unexpected first step: {step:?}"),
        }
        match &steps[2] {
            TxStep::Load(load) => {
                assert_eq!(load.table, "stg_products");
                assert_eq!(load.rows.len(), 1);
                assert!(load.path.ends_with("products.tsv"));
            }
            step => panic!("unexpected third step: {step:?}"),
        }
    }

    #[tokio::test]
    async fn test_import_runs_one_transaction() {
        let temp_dir = TempDir::new().unwrap();
        write_snapshot(temp_dir.path());
        let snapshot = load_snapshot(temp_dir.path()).unwrap();

        let mut stub = StubChannel::default();
        let mut importer = Importer::new(&mut stub, context());
        let counts = importer.import(snapshot).await.unwrap();

        assert_eq!(counts.total(), 5);
        assert_eq!(stub.transactions.len(), 1);
        assert_eq!(stub.transactions[0].len(), 5 * 3 + 18);
    }

    #[tokio::test]
    async fn test_import_surfaces_transaction_failure() {
        let temp_dir = TempDir::new().unwrap();
        write_snapshot(temp_dir.path());
        let snapshot = load_snapshot(temp_dir.path()).unwrap();

        let mut stub = StubChannel::default();
        stub.fail_transaction = true;
        let mut importer = Importer::new(&mut stub, context());

        let err = importer.import(snapshot).await.unwrap_err();
        assert!(matches!(err, Error::Channel(_)));
        assert!(stub.transactions.is_empty());
    }
}
