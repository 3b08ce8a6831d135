//! Connector registry: opens source handles by driver name.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tarn_core::SourceHandle;
use tracing::debug;

use crate::error::ConnectorError;

/// Settings handed to a connector when it is opened.
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfig {
    /// Driver variables such as credentials or a DSN.
    pub vars: BTreeMap<String, String>,
    /// Root that relative local paths resolve against.
    pub repo_root: PathBuf,
    pub allow_host_access: bool,
}

impl ConnectorConfig {
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn with_var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }
}

/// Opens handles for one driver.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    fn driver(&self) -> &'static str;

    async fn open(&self, config: &ConnectorConfig) -> Result<Arc<dyn SourceHandle>, ConnectorError>;
}

pub struct ConnectorRegistry {
    factories: Vec<Arc<dyn ConnectorFactory>>,
}

impl ConnectorRegistry {
    pub fn new(factories: Vec<Arc<dyn ConnectorFactory>>) -> Self {
        Self { factories }
    }

    /// Add a factory. A later factory for the same driver takes precedence.
    pub fn register(&mut self, factory: Arc<dyn ConnectorFactory>) {
        self.factories.insert(0, factory);
    }

    pub fn drivers(&self) -> Vec<&'static str> {
        self.factories.iter().map(|f| f.driver()).collect()
    }

    pub async fn open(&self, driver: &str, config: &ConnectorConfig) -> Result<Arc<dyn SourceHandle>, ConnectorError> {
        let factory = self
            .factories
            .iter()
            .find(|f| f.driver() == driver)
            .ok_or_else(|| ConnectorError::UnsupportedDriver(driver.to_string()))?;
        debug!("Opening {} connector", driver);
        factory.open(config).await
    }
}

// ---------------------------------------------------------------------------
// Built-in factories
// ---------------------------------------------------------------------------

pub struct LocalFileFactory;

#[async_trait]
impl ConnectorFactory for LocalFileFactory {
    fn driver(&self) -> &'static str {
        crate::local_file::DRIVER
    }

    async fn open(&self, config: &ConnectorConfig) -> Result<Arc<dyn SourceHandle>, ConnectorError> {
        let root = config
            .var("dsn")
            .map(PathBuf::from)
            .unwrap_or_else(|| config.repo_root.clone());
        Ok(Arc::new(crate::local_file::LocalFileHandle::new(
            root,
            config.allow_host_access,
        )))
    }
}

pub struct S3Factory;

#[async_trait]
impl ConnectorFactory for S3Factory {
    fn driver(&self) -> &'static str {
        "s3"
    }

    async fn open(&self, config: &ConnectorConfig) -> Result<Arc<dyn SourceHandle>, ConnectorError> {
        let s3 = crate::cloud_storage::S3Config::from_vars(config);
        Ok(Arc::new(crate::cloud_storage::ObjectStoreHandle::s3(s3)))
    }
}

pub struct GcsFactory;

#[async_trait]
impl ConnectorFactory for GcsFactory {
    fn driver(&self) -> &'static str {
        "gcs"
    }

    async fn open(&self, config: &ConnectorConfig) -> Result<Arc<dyn SourceHandle>, ConnectorError> {
        let gcs = crate::cloud_storage::GcsConfig::from_vars(config);
        Ok(Arc::new(crate::cloud_storage::ObjectStoreHandle::gcs(gcs)))
    }
}

pub struct PostgresFactory;

#[async_trait]
impl ConnectorFactory for PostgresFactory {
    fn driver(&self) -> &'static str {
        "postgres"
    }

    async fn open(&self, config: &ConnectorConfig) -> Result<Arc<dyn SourceHandle>, ConnectorError> {
        let dsn = config
            .var("dsn")
            .or_else(|| config.var("database_url"))
            .ok_or_else(|| ConnectorError::ConfigError("postgres requires a dsn".to_string()))?;
        Ok(Arc::new(crate::postgres::PostgresHandle::connect_lazy(dsn)?))
    }
}

pub struct InlineFactory;

#[async_trait]
impl ConnectorFactory for InlineFactory {
    fn driver(&self) -> &'static str {
        crate::inline::DRIVER
    }

    async fn open(&self, _config: &ConnectorConfig) -> Result<Arc<dyn SourceHandle>, ConnectorError> {
        Ok(Arc::new(crate::inline::InlineHandle))
    }
}

/// Build the registry with all built-in connectors.
pub fn default_registry() -> ConnectorRegistry {
    ConnectorRegistry::new(vec![
        Arc::new(LocalFileFactory),
        Arc::new(S3Factory),
        Arc::new(GcsFactory),
        Arc::new(PostgresFactory),
        Arc::new(InlineFactory),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_core::Capability;

    #[tokio::test]
    async fn opens_known_drivers() {
        let registry = default_registry();
        assert_eq!(
            registry.drivers(),
            vec!["local_file", "s3", "gcs", "postgres", "inline"]
        );

        let handle = registry
            .open("local_file", &ConnectorConfig::default())
            .await
            .unwrap();
        assert_eq!(handle.driver(), "local_file");
        assert!(handle.capabilities().contains(Capability::Files));
    }

    #[tokio::test]
    async fn unknown_driver_is_a_config_error() {
        let err = default_registry()
            .open("ftp", &ConnectorConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::UnsupportedDriver(d) if d == "ftp"));
    }

    #[tokio::test]
    async fn postgres_requires_dsn() {
        let err = default_registry()
            .open("postgres", &ConnectorConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::ConfigError(_)));
    }
}
