//! Typed errors for the connectors crate.

use std::fmt;

/// Errors raised while opening or reading a source.
#[derive(Debug)]
pub enum ConnectorError {
    /// Failed to establish a connection to the data source.
    ConnectionFailed(String),
    /// The object, file or table does not exist.
    NotFound(String),
    /// No connector is registered under the driver name.
    UnsupportedDriver(String),
    /// A query or read against the source failed.
    QueryFailed(String),
    /// Invalid or missing configuration.
    ConfigError(String),
    /// Local filesystem failure.
    Io(std::io::Error),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            ConnectorError::NotFound(msg) => write!(f, "not found: {}", msg),
            ConnectorError::UnsupportedDriver(name) => write!(f, "unsupported driver: {}", name),
            ConnectorError::QueryFailed(msg) => write!(f, "query failed: {}", msg),
            ConnectorError::ConfigError(msg) => write!(f, "config error: {}", msg),
            ConnectorError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for ConnectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectorError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ConnectorError {
    fn from(e: anyhow::Error) -> Self {
        ConnectorError::QueryFailed(e.to_string())
    }
}

impl From<sqlx::Error> for ConnectorError {
    fn from(e: sqlx::Error) -> Self {
        ConnectorError::ConnectionFailed(e.to_string())
    }
}

impl From<object_store::Error> for ConnectorError {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => ConnectorError::NotFound(path),
            other => ConnectorError::QueryFailed(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(e: std::io::Error) -> Self {
        ConnectorError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            ConnectorError::UnsupportedDriver("ftp".into()).to_string(),
            "unsupported driver: ftp"
        );
        assert_eq!(
            ConnectorError::ConfigError("missing path".into()).to_string(),
            "config error: missing path"
        );
        let not_found: ConnectorError = object_store::Error::NotFound {
            path: "bucket/a.csv".into(),
            source: "gone".into(),
        }
        .into();
        assert!(matches!(not_found, ConnectorError::NotFound(p) if p == "bucket/a.csv"));
    }
}
