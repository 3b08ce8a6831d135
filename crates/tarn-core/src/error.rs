//! Typed errors for the OLAP layer.

use std::time::Duration;

use datafusion::arrow::error::ArrowError;
use datafusion::error::DataFusionError;
use thiserror::Error;

use crate::dialect::DialectError;

#[derive(Debug, Error)]
pub enum OlapError {
    /// Table, view or schema does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation the engine cannot perform.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Dialect(#[from] DialectError),
    /// Statement exceeded its execution timeout.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection pool closed")]
    Closed,
    #[error(transparent)]
    Engine(#[from] DataFusionError),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

impl OlapError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OlapError::NotFound(_))
    }
}
