//! Errors surfaced by the migrator and the reconcile loop.

use std::time::Duration;

use tarn_core::{DialectError, OlapError, TransferError};
use thiserror::Error;

use crate::catalog::CatalogError;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("not found: {0}")]
    NotFound(String),
    /// The engine grew past the ingestion byte quota while the transfer ran.
    #[error("ingestion limit of {limit_bytes} bytes exceeded")]
    IngestionLimitExceeded { limit_bytes: u64 },
    #[error("ingestion timed out after {0:?}")]
    Timeout(Duration),
    #[error("ingestion cancelled")]
    Cancelled,
    #[error(transparent)]
    Transfer(TransferError),
    #[error("{0}")]
    Unsupported(String),
    #[error(transparent)]
    Dialect(#[from] DialectError),
    #[error("invalid source: {0}")]
    Config(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Olap(#[from] OlapError),
}

impl MigrateError {
    /// Only a deadline is worth retrying as is. Quota violations and
    /// configuration errors fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MigrateError::Timeout(_))
    }

    /// The source holds no data; no table or catalog entry was created.
    pub fn is_no_rows(&self) -> bool {
        matches!(self, MigrateError::Transfer(TransferError::NoRows))
    }
}

impl From<TransferError> for MigrateError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Cancelled => MigrateError::Cancelled,
            TransferError::Unsupported(msg) => MigrateError::Unsupported(msg),
            TransferError::Dialect(e) => MigrateError::Dialect(e),
            other => MigrateError::Transfer(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_retryable() {
        assert!(MigrateError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!MigrateError::IngestionLimitExceeded { limit_bytes: 10 }.is_retryable());
        assert!(!MigrateError::Cancelled.is_retryable());
        assert!(!MigrateError::Config("x".into()).is_retryable());
    }

    #[test]
    fn transfer_errors_are_classified() {
        assert!(matches!(
            MigrateError::from(TransferError::Cancelled),
            MigrateError::Cancelled
        ));
        assert!(MigrateError::from(TransferError::NoRows).is_no_rows());
        assert!(matches!(
            MigrateError::from(TransferError::Unsupported("x".into())),
            MigrateError::Unsupported(_)
        ));
    }
}
