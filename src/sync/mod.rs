//! Catalog synchronization between a live store and snapshot directories.
//!
//! - **Export**: live catalog → tab-separated flat files, deterministic
//!   byte-for-byte for identical data
//! - **Import**: flat files → staging tables → a fixed merge sequence,
//!   all inside one transaction
//!
//! # Architecture
//!
//! Both directions share the same entity descriptors: one declarative
//! table of file names, columns and natural keys drives the queries, the
//! validation, and the staging DDL. The importer never talks
//! SQL directly; it assembles a [`TxStep`](crate::channel::TxStep) plan and
//! hands it to the channel, which owns transaction boundaries and
//! foreign-key suspension.
//!
//! # File Format
//!
//! Each flat file is UTF-8 tab-separated text with one header line. Empty
//! cells mean SQL NULL; there is no quoting, and framing bytes inside
//! values are collapsed to spaces at export time:
//! ```text
//! id_product	reference	name	...
//! 10	DEMO-10	Ceramic mug	...
//! ```

mod export;
mod file;
mod import;
mod merge;
mod types;

pub use export::Exporter;
pub use file::{atomic_write, read_tsv, write_tsv};
pub use import::{Importer, Snapshot, build_plan, load_snapshot};
pub use types::{
    CATEGORIES, ENTITIES, EntityCounts, EntitySpec, ExportReport, IMAGES, ImportReport,
    MEMBERSHIPS, PRODUCTS, VARIANTS, validate_rows,
};
