//! Tarn migrator: turns declared sources into views over staging tables in
//! the OLAP engine and keeps a catalog of what was built.
//!
//! Every build ingests into a fresh `__<name>_<millis>` staging table and
//! then swaps the source's view onto it, so readers always see one complete
//! version. The [`Reconciler`] drives [`SourceMigrator`] across a desired
//! set of sources with bounded parallelism.

pub mod catalog;
pub mod config;
pub mod error;
mod ingest;
pub mod migrator;
pub mod normalize;
pub mod reconciler;

pub use catalog::{Catalog, CatalogEntry, CatalogError, MemoryCatalog, ObjectKind, PgCatalog, SourceDefinition};
pub use config::MigratorConfig;
pub use error::MigrateError;
pub use ingest::connector_variables;
pub use migrator::{is_staging_table_of, SourceMigrator};
pub use normalize::{normalize, sources_equal};
pub use reconciler::{ReconcileReport, ReconcileRequest, Reconciler, SourceAction, SourceReport};
