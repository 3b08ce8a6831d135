//! Migrator configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Applies when a source sets no timeout of its own.
    pub default_timeout: Duration,
    /// How often the supervisor polls the engine size.
    pub watchdog_interval: Duration,
    /// Engine size quota. A source may override it.
    pub ingest_limit_bytes: Option<u64>,
    pub batch_size: usize,
    /// Sources reconciled concurrently.
    pub parallelism: usize,
    pub allow_host_access: bool,
    pub repo_root: PathBuf,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60 * 60),
            watchdog_interval: Duration::from_secs(5),
            ingest_limit_bytes: None,
            batch_size: tarn_core::transport::DEFAULT_BATCH_SIZE,
            parallelism: 4,
            allow_host_access: false,
            repo_root: PathBuf::from("."),
        }
    }
}

impl MigratorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            default_timeout: Duration::from_secs(
                std::env::var("TARN_INGEST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| defaults.default_timeout.as_secs().to_string())
                    .parse()
                    .context("Invalid TARN_INGEST_TIMEOUT_SECS")?,
            ),
            watchdog_interval: Duration::from_millis(
                std::env::var("TARN_WATCHDOG_INTERVAL_MS")
                    .unwrap_or_else(|_| defaults.watchdog_interval.as_millis().to_string())
                    .parse()
                    .context("Invalid TARN_WATCHDOG_INTERVAL_MS")?,
            ),
            ingest_limit_bytes: std::env::var("TARN_INGEST_LIMIT_BYTES")
                .ok()
                .map(|v| v.parse())
                .transpose()
                .context("Invalid TARN_INGEST_LIMIT_BYTES")?,
            batch_size: std::env::var("TARN_BATCH_SIZE")
                .unwrap_or_else(|_| defaults.batch_size.to_string())
                .parse()
                .context("Invalid TARN_BATCH_SIZE")?,
            parallelism: std::env::var("TARN_RECONCILE_PARALLELISM")
                .unwrap_or_else(|_| defaults.parallelism.to_string())
                .parse()
                .context("Invalid TARN_RECONCILE_PARALLELISM")?,
            allow_host_access: std::env::var("TARN_ALLOW_HOST_ACCESS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            repo_root: std::env::var("TARN_REPO_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.repo_root),
        };
        anyhow::ensure!(!config.watchdog_interval.is_zero(), "TARN_WATCHDOG_INTERVAL_MS must be positive");
        anyhow::ensure!(config.parallelism > 0, "TARN_RECONCILE_PARALLELISM must be positive");
        Ok(config)
    }
}
