//! Tarn connectors - source handles for ingestion
//!
//! - Local files (CSV, Parquet, JSON) relative to the repo root
//! - S3 and GCS objects via object_store, with glob listing
//! - PostgreSQL queries streamed as rows
//! - Inline rows declared in the source definition

pub mod cloud_storage;
pub mod error;
pub mod extract;
pub mod inline;
pub mod local_file;
pub mod postgres;
pub mod registry;

pub use cloud_storage::{GcsConfig, GlobLimits, ObjectStoreHandle, S3Config};
pub use error::ConnectorError;
pub use inline::InlineHandle;
pub use local_file::{CsvRowIterator, LocalFileHandle};
pub use postgres::PostgresHandle;
pub use registry::{default_registry, ConnectorConfig, ConnectorFactory, ConnectorRegistry};
