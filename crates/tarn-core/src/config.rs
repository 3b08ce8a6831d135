//! OLAP engine configuration from environment variables.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct OlapConfig {
    /// Identifies this engine instance in emitted telemetry.
    pub instance_id: String,
    /// Slots for metadata/introspection queries.
    pub meta_pool_size: usize,
    /// Slots for analytical queries.
    pub olap_pool_size: usize,
    /// Long-running statements additionally take one of these slots.
    pub long_running_slots: usize,
    /// Schema holding staging tables.
    pub staging_schema: String,
    /// Log every statement at info level.
    pub log_queries: bool,
}

impl Default for OlapConfig {
    fn default() -> Self {
        Self {
            instance_id: "default".to_string(),
            meta_pool_size: 2,
            olap_pool_size: 8,
            long_running_slots: 1,
            staging_schema: "tarn_sources".to_string(),
            log_queries: false,
        }
    }
}

impl OlapConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            instance_id: std::env::var("TARN_INSTANCE_ID").unwrap_or(defaults.instance_id),
            meta_pool_size: std::env::var("TARN_META_POOL_SIZE")
                .unwrap_or_else(|_| defaults.meta_pool_size.to_string())
                .parse()
                .context("Invalid TARN_META_POOL_SIZE")?,
            olap_pool_size: std::env::var("TARN_OLAP_POOL_SIZE")
                .unwrap_or_else(|_| defaults.olap_pool_size.to_string())
                .parse()
                .context("Invalid TARN_OLAP_POOL_SIZE")?,
            long_running_slots: std::env::var("TARN_LONG_RUNNING_SLOTS")
                .unwrap_or_else(|_| defaults.long_running_slots.to_string())
                .parse()
                .context("Invalid TARN_LONG_RUNNING_SLOTS")?,
            staging_schema: std::env::var("TARN_STAGING_SCHEMA")
                .unwrap_or(defaults.staging_schema),
            log_queries: std::env::var("TARN_LOG_QUERIES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };
        anyhow::ensure!(config.meta_pool_size > 0, "TARN_META_POOL_SIZE must be positive");
        anyhow::ensure!(config.olap_pool_size > 0, "TARN_OLAP_POOL_SIZE must be positive");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid races.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "TARN_INSTANCE_ID",
            "TARN_META_POOL_SIZE",
            "TARN_OLAP_POOL_SIZE",
            "TARN_LONG_RUNNING_SLOTS",
            "TARN_STAGING_SCHEMA",
            "TARN_LOG_QUERIES",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        let config = OlapConfig::from_env().unwrap();
        assert_eq!(config.meta_pool_size, 2);
        assert_eq!(config.olap_pool_size, 8);
        assert_eq!(config.long_running_slots, 1);
        assert_eq!(config.staging_schema, "tarn_sources");
        assert!(!config.log_queries);
    }

    #[test]
    fn from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe {
            std::env::set_var("TARN_INSTANCE_ID", "inst-7");
            std::env::set_var("TARN_OLAP_POOL_SIZE", "3");
            std::env::set_var("TARN_LOG_QUERIES", "1");
        }

        let config = OlapConfig::from_env().unwrap();
        assert_eq!(config.instance_id, "inst-7");
        assert_eq!(config.olap_pool_size, 3);
        assert!(config.log_queries);

        clear_env();
    }

    #[test]
    fn from_env_rejects_zero_pool() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe { std::env::set_var("TARN_META_POOL_SIZE", "0") };
        assert!(OlapConfig::from_env().is_err());

        unsafe { std::env::set_var("TARN_META_POOL_SIZE", "many") };
        assert!(OlapConfig::from_env().is_err());

        clear_env();
    }
}
