//! One ingestion: open the source connector, pick a transporter and run it
//! into a staging table under a deadline and a size quota.
//!
//! A supervisor task owns both limits. It cancels the transfer through a
//! child token, so transporters unwind through their own cleanup, and is
//! joined before the ingestion returns.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tarn_connectors::{ConnectorConfig, ConnectorRegistry};
use tarn_core::{
    select_transporter, ActivitySink, CleanupReport, OlapEngine, Progress, ProgressUnit,
    SourceHandle, TableName, Tag, TransferOptions, TransferOutcome, TransferRequest, ENGINE_DRIVER,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::SourceDefinition;
use crate::config::MigratorConfig;
use crate::error::MigrateError;

/// Everything an ingestion needs besides the source itself.
pub(crate) struct IngestContext<'a> {
    pub engine: &'a Arc<OlapEngine>,
    pub connectors: &'a ConnectorRegistry,
    pub config: &'a MigratorConfig,
    /// Instance variables with lower-cased keys.
    pub variables: &'a BTreeMap<String, String>,
    pub activity: &'a dyn ActivitySink,
}

/// Why the supervisor stopped the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trip {
    None,
    Deadline,
    Limit,
}

impl IngestContext<'_> {
    fn allow_host_access(&self) -> bool {
        self.config.allow_host_access
            || self
                .variables
                .get("allow_host_access")
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Ingest `source` (already normalised) into `destination`.
    pub async fn ingest(
        &self,
        source: &SourceDefinition,
        destination: &TableName,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, MigrateError> {
        let handle: Arc<dyn SourceHandle> = if source.connector == ENGINE_DRIVER {
            Arc::clone(self.engine) as Arc<dyn SourceHandle>
        } else {
            let config = connector_variables(
                &source.connector,
                self.variables,
                &self.config.repo_root,
                self.allow_host_access(),
            );
            self.connectors
                .open(&source.connector, &config)
                .await
                .map_err(|e| MigrateError::Config(format!("failed to open driver: {}", e)))?
        };

        let result = self.transfer(handle.as_ref(), source, destination, cancel).await;

        if source.connector != ENGINE_DRIVER {
            let mut cleanup = CleanupReport::new();
            cleanup.record("close source connector", handle.close().await);
            cleanup.log();
        }
        result
    }

    async fn transfer(
        &self,
        handle: &dyn SourceHandle,
        source: &SourceDefinition,
        destination: &TableName,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, MigrateError> {
        let caps = handle.capabilities();
        let transporter = select_transporter(self.engine, handle, &caps).ok_or_else(|| {
            MigrateError::Unsupported(format!(
                "data transfer not possible from {:?} to {:?}",
                handle.driver(),
                ENGINE_DRIVER
            ))
        })?;

        let timeout = source
            .timeout_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_timeout);
        let limit = source.ingest_limit_bytes.or(self.config.ingest_limit_bytes);

        let child = cancel.child_token();
        let supervisor = tokio::spawn(supervise(
            Arc::clone(self.engine),
            child.clone(),
            timeout,
            limit,
            self.config.watchdog_interval,
        ));

        let progress = Arc::new(Progress::new());
        let request = source.request();
        let started = Instant::now();
        debug!(
            "Ingesting {} via {} into {}",
            source.name,
            transporter.name(),
            destination
        );
        let result = transporter
            .transfer(TransferRequest {
                source: handle,
                request: &request,
                destination,
                cancel: child.clone(),
                progress: progress.clone(),
                options: TransferOptions {
                    batch_size: self.config.batch_size,
                    repo_root: self.config.repo_root.clone(),
                    allow_host_access: self.allow_host_access(),
                    limit_bytes: limit,
                },
            })
            .await;

        // Stops the supervisor; its verdict is read after the join.
        child.cancel();
        let mut trip = match supervisor.await {
            Ok(trip) => trip,
            Err(e) => {
                warn!("Ingestion supervisor for {} failed: {}", source.name, e);
                Trip::None
            }
        };
        // A transfer can finish between two supervisor ticks.
        if trip == Trip::None && result.is_ok() {
            if let Some(limit) = limit {
                if self.engine.estimate_size() > limit {
                    trip = Trip::Limit;
                }
            }
        }

        let result: Result<TransferOutcome, MigrateError> = match trip {
            Trip::Limit => Err(MigrateError::IngestionLimitExceeded {
                limit_bytes: limit.unwrap_or_default(),
            }),
            Trip::Deadline => Err(MigrateError::Timeout(timeout)),
            Trip::None => result.map_err(MigrateError::from),
        };

        let bytes = match &result {
            Ok(outcome) => outcome.bytes,
            Err(_) => progress.bytes(),
        };
        let tags = [
            Tag::new("source", handle.driver()),
            Tag::new("destination", ENGINE_DRIVER),
            Tag::new(
                "cancelled",
                matches!(result, Err(MigrateError::Cancelled | MigrateError::Timeout(_))),
            ),
            Tag::new("failed", result.is_err()),
            Tag::new("limit_exceeded", trip == Trip::Limit),
            Tag::new("limit_bytes", limit.unwrap_or_default()),
        ];
        self.activity
            .emit("ingestion_ms", started.elapsed().as_millis() as f64, &tags);
        let counted_bytes = result.is_ok() || matches!(progress.target(), Some((_, ProgressUnit::Bytes)));
        if counted_bytes {
            self.activity.emit("ingestion_bytes", bytes as f64, &tags);
        }

        match &result {
            Ok(outcome) => info!(
                "Ingested {} into {} ({} bytes) in {:?}",
                source.name,
                destination,
                outcome.bytes,
                started.elapsed()
            ),
            Err(e) if e.is_no_rows() => debug!("Source {} produced no rows", source.name),
            Err(e) => warn!("Ingestion of {} failed: {}", source.name, e),
        }
        result
    }
}

/// Cancel `token` at the deadline or once the engine outgrows `limit`.
async fn supervise(
    engine: Arc<OlapEngine>,
    token: CancellationToken,
    timeout: Duration,
    limit: Option<u64>,
    every: Duration,
) -> Trip {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Trip::None,
            _ = &mut deadline => {
                token.cancel();
                return Trip::Deadline;
            }
            _ = ticker.tick() => {
                let Some(limit) = limit else { continue };
                let size = engine.estimate_size();
                if size > limit {
                    warn!("Engine size {} exceeds ingestion limit {}, cancelling", size, limit);
                    token.cancel();
                    return Trip::Limit;
                }
            }
        }
    }
}

/// Connector settings derived from the instance variables.
pub fn connector_variables(
    connector: &str,
    variables: &BTreeMap<String, String>,
    repo_root: &Path,
    allow_host_access: bool,
) -> ConnectorConfig {
    let mut config = ConnectorConfig {
        vars: BTreeMap::new(),
        repo_root: repo_root.to_path_buf(),
        allow_host_access,
    };
    let copy = |config: ConnectorConfig, key: &str| match variables.get(key) {
        Some(value) => config.with_var(key, value.clone()),
        None => config,
    };
    match connector {
        "s3" => {
            for key in [
                "aws_access_key_id",
                "aws_secret_access_key",
                "aws_session_token",
                "aws_region",
                "aws_endpoint_url",
            ] {
                config = copy(config, key);
            }
        }
        "gcs" => config = copy(config, "google_application_credentials"),
        "local_file" => config = config.with_var("dsn", repo_root.to_string_lossy()),
        "postgres" => config = copy(config, "database_url"),
        _ => {}
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        [
            ("aws_access_key_id", "AKIA"),
            ("aws_secret_access_key", "s3cr3t"),
            ("google_application_credentials", "{}"),
            ("database_url", "postgres://db/app"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn variables_are_scoped_per_connector() {
        let root = Path::new("/repo");
        let s3 = connector_variables("s3", &vars(), root, false);
        assert_eq!(s3.var("aws_access_key_id"), Some("AKIA"));
        assert_eq!(s3.var("google_application_credentials"), None);

        let gcs = connector_variables("gcs", &vars(), root, false);
        assert_eq!(gcs.var("google_application_credentials"), Some("{}"));
        assert_eq!(gcs.var("aws_access_key_id"), None);

        let local = connector_variables("local_file", &vars(), root, true);
        assert_eq!(local.var("dsn"), Some("/repo"));
        assert!(local.allow_host_access);

        let pg = connector_variables("postgres", &vars(), root, false);
        assert_eq!(pg.var("database_url"), Some("postgres://db/app"));
    }

    #[tokio::test]
    async fn supervisor_stops_when_transfer_ends() {
        let engine = Arc::new(
            OlapEngine::open(tarn_core::OlapConfig::default(), tarn_core::metrics::noop_sink())
                .await
                .unwrap(),
        );
        let token = CancellationToken::new();
        let task = tokio::spawn(supervise(
            engine.clone(),
            token.clone(),
            Duration::from_secs(60),
            Some(1),
            Duration::from_millis(10),
        ));
        token.cancel();
        assert_eq!(task.await.unwrap(), Trip::None);

        let token = CancellationToken::new();
        let trip = supervise(engine, token.clone(), Duration::from_millis(20), None, Duration::from_secs(5)).await;
        assert_eq!(trip, Trip::Deadline);
        assert!(token.is_cancelled());
    }
}
