//! Transporters move data from a source handle into an engine table.
//!
//! The engine offers three native paths, picked from the source's
//! capabilities: a query it can run itself, local files it can scan, or a
//! generic row iterator. Sources may also bring their own transporter.

mod files;
mod progress;
mod rows;
mod self_query;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::dialect::DialectError;
use crate::error::OlapError;
use crate::handle::{Capabilities, Capability, SourceHandle, SourceRequest};
use crate::olap::{OlapEngine, TableName, ENGINE_DRIVER};

pub use files::FilesToOlap;
pub use progress::Progress;
pub use rows::RowIteratorToOlap;
pub use self_query::SelfToOlap;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The source produced no schema because it holds no data.
    #[error("no rows found")]
    NoRows,
    #[error("row iterator failed: {0}")]
    Iterator(#[source] anyhow::Error),
    #[error("table definition failed: {0}")]
    Ddl(#[source] OlapError),
    #[error("append failed: {0}")]
    Append(#[source] OlapError),
    #[error("transfer cancelled")]
    Cancelled,
    #[error("unsupported transfer: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Dialect(#[from] DialectError),
    #[error("source failed: {0}")]
    Source(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Rows buffered per append flush.
    pub batch_size: usize,
    /// Root that relative local paths resolve against.
    pub repo_root: PathBuf,
    pub allow_host_access: bool,
    /// Ingestion cap, for transporters that can honour it up front.
    pub limit_bytes: Option<u64>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            repo_root: PathBuf::from("."),
            allow_host_access: false,
            limit_bytes: None,
        }
    }
}

pub struct TransferRequest<'a> {
    pub source: &'a dyn SourceHandle,
    pub request: &'a SourceRequest,
    pub destination: &'a TableName,
    pub cancel: CancellationToken,
    pub progress: Arc<Progress>,
    pub options: TransferOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferOutcome {
    /// Rows written, when the transporter counted them.
    pub rows: Option<u64>,
    pub bytes: u64,
}

#[async_trait]
pub trait Transporter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transfer(&self, req: TransferRequest<'_>) -> Result<TransferOutcome, TransferError>;
}

/// Choose how to move data from `source` into `engine`.
///
/// The engine's own paths win over a transporter the source provides.
pub fn select_transporter(
    engine: &Arc<OlapEngine>,
    source: &dyn SourceHandle,
    caps: &Capabilities,
) -> Option<Arc<dyn Transporter>> {
    if caps.contains(Capability::NativeQuery) && source.driver() == ENGINE_DRIVER {
        return Some(Arc::new(SelfToOlap::new(Arc::clone(engine))));
    }
    if caps.contains(Capability::Files) {
        return Some(Arc::new(FilesToOlap::new(Arc::clone(engine))));
    }
    if caps.contains(Capability::RowIterator) {
        return Some(Arc::new(RowIteratorToOlap::new(Arc::clone(engine))));
    }
    let dialect = engine.dialect();
    if caps.contains(Capability::TransportTo(dialect)) {
        return source.transporter(dialect);
    }
    None
}

/// Wait for `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, TransferError>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        out = fut => Ok(out),
    }
}
