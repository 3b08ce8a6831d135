//! Source migrator: builds each source as a view over a timestamped staging
//! table.
//!
//! Data is always ingested into a fresh `__<name>_<millis>` table first.
//! `CREATE OR REPLACE VIEW` is the single commit point, so readers see
//! either the previous version or the new one. Failed ingestions drop only
//! the new staging table.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tarn_connectors::ConnectorRegistry;
use tarn_core::{ActivitySink, CleanupReport, OlapEngine, TableName, TransferOutcome, CLEANUP_PRIORITY};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::{CatalogEntry, ObjectKind, SourceDefinition};
use crate::config::MigratorConfig;
use crate::error::MigrateError;
use crate::ingest::IngestContext;
use crate::normalize::{normalize, sources_equal};

const TEMP_RENAME_PREFIX: &str = "__tarn_temp_";

/// Whether `table` is a staging table of source `name`.
pub fn is_staging_table_of(table: &str, name: &str) -> bool {
    table
        .strip_prefix("__")
        .and_then(|rest| rest.strip_prefix(name))
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|ts| !ts.is_empty() && ts.bytes().all(|b| b.is_ascii_digit()))
}

pub struct SourceMigrator {
    engine: Arc<OlapEngine>,
    connectors: Arc<ConnectorRegistry>,
    config: MigratorConfig,
    variables: BTreeMap<String, String>,
    activity: Arc<dyn ActivitySink>,
    last_millis: AtomicU64,
}

impl SourceMigrator {
    pub fn new(
        engine: Arc<OlapEngine>,
        connectors: Arc<ConnectorRegistry>,
        config: MigratorConfig,
        activity: Arc<dyn ActivitySink>,
    ) -> Self {
        Self {
            engine,
            connectors,
            config,
            variables: BTreeMap::new(),
            activity,
            last_millis: AtomicU64::new(0),
        }
    }

    /// Instance variables handed to connectors (credentials, host access).
    /// Keys are matched case-insensitively.
    pub fn with_variables(mut self, variables: impl IntoIterator<Item = (String, String)>) -> Self {
        self.variables = variables
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        self
    }

    pub fn engine(&self) -> &Arc<OlapEngine> {
        &self.engine
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    fn allow_host_access(&self) -> bool {
        self.config.allow_host_access
            || self
                .variables
                .get("allow_host_access")
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Millisecond timestamp, strictly increasing for this migrator.
    fn next_millis(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let previous = self
            .last_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    fn staging_table(&self, name: &str) -> TableName {
        TableName::qualified(
            self.engine.staging_schema(),
            format!("__{}_{}", name, self.next_millis()),
        )
    }

    fn ingest_context(&self) -> IngestContext<'_> {
        IngestContext {
            engine: &self.engine,
            connectors: &self.connectors,
            config: &self.config,
            variables: &self.variables,
            activity: self.activity.as_ref(),
        }
    }

    fn normalize(&self, source: &SourceDefinition) -> Result<SourceDefinition, MigrateError> {
        normalize(source, &self.config.repo_root, self.allow_host_access())
    }

    async fn ingest_into_staging(
        &self,
        source: &SourceDefinition,
        cancel: &CancellationToken,
    ) -> Result<(TableName, TransferOutcome), MigrateError> {
        let staging = self.staging_table(&source.name);
        match self.ingest_context().ingest(source, &staging, cancel).await {
            Ok(outcome) => Ok((staging, outcome)),
            Err(e) => {
                let mut cleanup = CleanupReport::new();
                cleanup.record(
                    "drop staging table",
                    self.engine.drop_table(&staging, false).await,
                );
                cleanup.log();
                Err(e)
            }
        }
    }

    async fn point_view_at(&self, name: &str, staging: &TableName) -> Result<(), MigrateError> {
        let select = format!("SELECT * FROM {}", staging.quoted());
        let result = self
            .engine
            .create_table_as_select(&TableName::bare(name), &select, true)
            .await;
        if let Err(e) = result {
            let mut cleanup = CleanupReport::new();
            cleanup.record("drop staging table", self.engine.drop_table(staging, false).await);
            cleanup.log();
            return Err(e.into());
        }
        Ok(())
    }

    fn entry(
        &self,
        source: SourceDefinition,
        staging: &TableName,
        outcome: TransferOutcome,
    ) -> CatalogEntry {
        CatalogEntry {
            name: source.name.clone(),
            kind: ObjectKind::View,
            source,
            bytes_ingested: outcome.bytes,
            refreshed_on: Utc::now(),
            staging_table: Some(staging.name.clone()),
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Build a source that has no catalog entry yet.
    pub async fn create(
        &self,
        source: &SourceDefinition,
        cancel: &CancellationToken,
    ) -> Result<CatalogEntry, MigrateError> {
        let source = self.normalize(source)?;
        let (staging, outcome) = self.ingest_into_staging(&source, cancel).await?;

        if let Err(e) = self.drop_if_exists(&source.name, false, None).await {
            let mut cleanup = CleanupReport::new();
            cleanup.record("drop staging table", self.engine.drop_table(&staging, false).await);
            cleanup.log();
            return Err(e);
        }
        self.point_view_at(&source.name, &staging).await?;

        // Leftovers of a build whose catalog entry was lost.
        let mut cleanup = CleanupReport::new();
        self.sweep_staging(&source.name, None, Some(&staging.name), &mut cleanup)
            .await;
        cleanup.log();

        info!("Created source {} over {}", source.name, staging);
        Ok(self.entry(source, &staging, outcome))
    }

    /// Re-ingest a source and swap its view. On failure the previous
    /// version stays visible and untouched.
    pub async fn update(
        &self,
        existing: &CatalogEntry,
        source: &SourceDefinition,
        cancel: &CancellationToken,
    ) -> Result<CatalogEntry, MigrateError> {
        let source = self.normalize(source)?;
        let (staging, outcome) = self.ingest_into_staging(&source, cancel).await?;

        if let Err(e) = self.drop_if_exists(&source.name, false, None).await {
            let mut cleanup = CleanupReport::new();
            cleanup.record("drop staging table", self.engine.drop_table(&staging, false).await);
            cleanup.log();
            return Err(e);
        }

        self.engine
            .with_connection(CLEANUP_PRIORITY, false, async {
                self.point_view_at(&source.name, &staging).await?;
                let mut cleanup = CleanupReport::new();
                self.sweep_staging(
                    &source.name,
                    existing.staging_table.as_deref(),
                    Some(&staging.name),
                    &mut cleanup,
                )
                .await;
                cleanup.log();
                Ok::<_, MigrateError>(())
            })
            .await??;

        info!("Updated source {} to {}", source.name, staging);
        Ok(self.entry(source, &staging, outcome))
    }

    /// Rename the object built for `from` to `entry.name`.
    pub async fn rename(&self, from: &str, entry: &CatalogEntry) -> Result<(), MigrateError> {
        if from == entry.name {
            return Ok(());
        }
        let mut current = TableName::bare(from);
        if from.eq_ignore_ascii_case(&entry.name) {
            let temp = TableName::bare(format!("{}{}", TEMP_RENAME_PREFIX, from));
            self.engine.rename_table(&current, &temp).await?;
            current = temp;
        }
        self.engine
            .rename_table(&current, &TableName::bare(entry.name.clone()))
            .await?;
        info!("Renamed source {} to {}", from, entry.name);
        Ok(())
    }

    /// Drop the object built for `entry` and every staging table it used.
    pub async fn delete(&self, entry: &CatalogEntry) -> Result<(), MigrateError> {
        self.drop_if_exists(&entry.name, true, entry.staging_table.as_deref())
            .await?;
        info!("Deleted source {}", entry.name);
        Ok(())
    }

    /// Whether `desired` would build the same data as `existing`.
    pub fn is_equal(&self, desired: &SourceDefinition, existing: &SourceDefinition) -> bool {
        if sources_equal(desired, existing) {
            return true;
        }
        self.normalize(desired)
            .map(|normalized| sources_equal(&normalized, existing))
            .unwrap_or(false)
    }

    pub async fn exists_in_olap(&self, name: &str) -> Result<bool, MigrateError> {
        match self.engine.information_schema().lookup(&TableName::bare(name)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Drop a stale table named `name`. Views are only dropped, with their
    /// staging tables, when `drop_view` is set.
    async fn drop_if_exists(
        &self,
        name: &str,
        drop_view: bool,
        recorded_staging: Option<&str>,
    ) -> Result<(), MigrateError> {
        let table = TableName::bare(name);
        let info = match self.engine.information_schema().lookup(&table).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => {
                if drop_view {
                    let mut cleanup = CleanupReport::new();
                    self.sweep_staging(name, recorded_staging, None, &mut cleanup).await;
                    cleanup.log();
                }
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !info.view {
            self.engine.drop_table(&table, false).await?;
            return Ok(());
        }
        if !drop_view {
            return Ok(());
        }
        self.engine.drop_table(&table, true).await?;
        let mut cleanup = CleanupReport::new();
        self.sweep_staging(name, recorded_staging, None, &mut cleanup).await;
        cleanup.log();
        Ok(())
    }

    /// Drop staging tables of `name`, plus `recorded`, except `keep`.
    async fn sweep_staging(
        &self,
        name: &str,
        recorded: Option<&str>,
        keep: Option<&str>,
        cleanup: &mut CleanupReport,
    ) {
        let schema = self.engine.staging_schema();
        let tables = match self.engine.information_schema().list(Some(schema)).await {
            Ok(tables) => tables,
            Err(e) => {
                cleanup.record("list staging tables", Err::<(), _>(e));
                return;
            }
        };
        for table in tables {
            let stale = is_staging_table_of(&table.name, name) || recorded == Some(table.name.as_str());
            if !stale || keep == Some(table.name.as_str()) {
                continue;
            }
            debug!("Dropping stale staging table {}", table.name);
            let result = self.engine.drop_table(&table.table_name(), table.view).await;
            cleanup.record(&format!("drop {}", table.name), result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_table_pattern() {
        assert!(is_staging_table_of("__orders_1700000000000", "orders"));
        assert!(!is_staging_table_of("__orders_", "orders"));
        assert!(!is_staging_table_of("__orders_tmp_rows", "orders"));
        assert!(!is_staging_table_of("__orders_items_17", "orders"));
        assert!(is_staging_table_of("__orders_items_17", "orders_items"));
        assert!(!is_staging_table_of("__Orders_17", "orders"));
    }

    #[tokio::test]
    async fn timestamps_are_strictly_increasing() {
        let engine = Arc::new(
            OlapEngine::open(tarn_core::OlapConfig::default(), tarn_core::metrics::noop_sink())
                .await
                .unwrap(),
        );
        let migrator = SourceMigrator::new(
            engine,
            Arc::new(tarn_connectors::default_registry()),
            MigratorConfig::default(),
            tarn_core::metrics::noop_sink(),
        );
        let stamps: Vec<u64> = (0..100).map(|_| migrator.next_millis()).collect();
        assert!(stamps.windows(2).all(|w| w[1] > w[0]));
    }
}
