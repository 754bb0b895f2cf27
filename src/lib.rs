//! catsync - catalog snapshot and restore for PrestaShop-style stores
//!
//! This crate provides the core functionality for the `catsync` CLI tool.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`channel`] - Database channel abstraction (network client / docker exec)
//! - [`config`] - Connection parameter discovery from on-disk layouts
//! - [`schema`] - Live schema context (table prefix, language, shop ids)
//! - [`sync`] - Snapshot export and merge-import engine
//! - [`snapshot`] - Snapshot directory layout, digests and manifest
//! - [`archive`] - Image tree archive and restore
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod schema;
pub mod snapshot;
pub mod sync;

pub use error::{Error, Result};
