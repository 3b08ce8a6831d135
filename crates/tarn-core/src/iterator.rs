//! Row iterator protocol: a connector-agnostic pull interface.
//!
//! Lifecycle is `schema()` -> `next()`* -> `close()`. The sequence is
//! unidirectional, not restartable and owned by a single consumer, which the
//! `&mut self` receivers enforce.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Row, StructType};

#[derive(Debug, Error)]
pub enum IteratorError {
    /// Normal end of data. Never logged as a failure.
    #[error("iterator done")]
    Done,
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

impl IteratorError {
    pub fn is_done(&self) -> bool {
        matches!(self, IteratorError::Done)
    }
}

/// Unit a size or progress figure is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressUnit {
    Bytes,
    Records,
}

#[async_trait]
pub trait RowIterator: Send {
    /// Column names and types. Fails with [`IteratorError::Done`] when the
    /// source holds no rows at all.
    async fn schema(&mut self) -> Result<StructType, IteratorError>;

    /// The next row, or [`IteratorError::Done`] once exhausted.
    async fn next(&mut self) -> Result<Row, IteratorError>;

    /// Total size in `unit`, when the source can tell ahead of time.
    fn size(&self, unit: ProgressUnit) -> Option<u64>;

    /// Release held resources. Calling it more than once is a no-op.
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// In-memory iterator over pre-built rows.
pub struct VecRowIterator {
    schema: Option<StructType>,
    rows: std::vec::IntoIter<Row>,
    total: u64,
    closed: bool,
}

impl VecRowIterator {
    /// An iterator with no schema reports `Done` from `schema()`.
    pub fn new(schema: Option<StructType>, rows: Vec<Row>) -> Self {
        let total = rows.len() as u64;
        Self {
            schema,
            rows: rows.into_iter(),
            total,
            closed: false,
        }
    }
}

#[async_trait]
impl RowIterator for VecRowIterator {
    async fn schema(&mut self) -> Result<StructType, IteratorError> {
        self.schema.clone().ok_or(IteratorError::Done)
    }

    async fn next(&mut self) -> Result<Row, IteratorError> {
        if self.closed {
            return Err(IteratorError::Done);
        }
        self.rows.next().ok_or(IteratorError::Done)
    }

    fn size(&self, unit: ProgressUnit) -> Option<u64> {
        match unit {
            ProgressUnit::Records => Some(self.total),
            ProgressUnit::Bytes => None,
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.closed = true;
        Ok(())
    }
}
