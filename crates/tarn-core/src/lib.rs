//! Tarn core: the embedded OLAP engine, the row iterator protocol,
//! transporters, canonical types and dialect translation.

pub mod cleanup;
pub mod config;
pub mod dialect;
pub mod error;
pub mod fileutil;
pub mod handle;
pub mod iterator;
pub mod metrics;
pub mod olap;
pub mod source;
pub mod sql_refs;
pub mod transport;
pub mod types;

pub use cleanup::CleanupReport;
pub use config::OlapConfig;
pub use dialect::{Dialect, DialectError};
pub use error::OlapError;
pub use handle::{Capabilities, Capability, FileFormat, LocalFiles, SourceHandle, SourceRequest};
pub use iterator::{IteratorError, ProgressUnit, RowIterator, VecRowIterator};
pub use metrics::{ActivitySink, MemorySink, NoopSink, PrometheusSink, Tag};
pub use olap::{
    EngineRegistry, OlapEngine, QueryResult, Statement, TableInfo, TableName, CLEANUP_PRIORITY,
    ENGINE_DRIVER,
};
pub use source::{ExtractPolicy, SourceProperties, Strategy};
pub use transport::{
    select_transporter, Progress, TransferError, TransferOptions, TransferOutcome,
    TransferRequest, Transporter,
};
pub use types::{Field, Row, StructType, Type, TypeCode, Value};
