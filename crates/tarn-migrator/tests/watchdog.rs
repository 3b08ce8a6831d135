use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tarn_connectors::{default_registry, ConnectorConfig, ConnectorError, ConnectorFactory};
use tarn_core::{
    ActivitySink, Capabilities, Capability, Field, IteratorError, MemorySink, OlapConfig,
    OlapEngine, ProgressUnit, Row, RowIterator, SourceHandle, SourceRequest, StructType, Type,
    TypeCode, Value,
};
use tarn_migrator::{
    Catalog, MemoryCatalog, MigrateError, MigratorConfig, ReconcileRequest, Reconciler,
    SourceDefinition, SourceMigrator,
};

/// Yields rows until cancelled.
struct EndlessRows {
    next: i64,
}

#[async_trait]
impl RowIterator for EndlessRows {
    async fn schema(&mut self) -> Result<StructType, IteratorError> {
        Ok(StructType::new(vec![
            Field::new("id", Type::new(TypeCode::Int64)),
            Field::new("label", Type::new(TypeCode::String)),
        ]))
    }

    async fn next(&mut self) -> Result<Row, IteratorError> {
        tokio::task::yield_now().await;
        self.next += 1;
        Ok(vec![Value::Int(self.next), Value::Str(format!("row-{}", self.next))])
    }

    fn size(&self, _unit: ProgressUnit) -> Option<u64> {
        None
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct EndlessHandle;

#[async_trait]
impl SourceHandle for EndlessHandle {
    fn driver(&self) -> &str {
        "endless"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new([Capability::RowIterator])
    }

    async fn query(&self, _req: &SourceRequest) -> anyhow::Result<Box<dyn RowIterator>> {
        Ok(Box::new(EndlessRows { next: 0 }))
    }
}

struct EndlessFactory;

#[async_trait]
impl ConnectorFactory for EndlessFactory {
    fn driver(&self) -> &'static str {
        "endless"
    }

    async fn open(&self, _config: &ConnectorConfig) -> Result<Arc<dyn SourceHandle>, ConnectorError> {
        Ok(Arc::new(EndlessHandle))
    }
}

struct Harness {
    engine: Arc<OlapEngine>,
    catalog: Arc<MemoryCatalog>,
    sink: Arc<MemorySink>,
    reconciler: Reconciler,
}

async fn harness(config: MigratorConfig) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let activity: Arc<dyn ActivitySink> = sink.clone();
    let engine = Arc::new(
        OlapEngine::open(OlapConfig::default(), activity.clone())
            .await
            .unwrap(),
    );
    let mut connectors = default_registry();
    connectors.register(Arc::new(EndlessFactory));
    let catalog = Arc::new(MemoryCatalog::new());
    let migrator = Arc::new(SourceMigrator::new(
        engine.clone(),
        Arc::new(connectors),
        config,
        activity,
    ));
    let reconciler = Reconciler::new(migrator, catalog.clone());
    Harness {
        engine,
        catalog,
        sink,
        reconciler,
    }
}

fn request(source: SourceDefinition) -> ReconcileRequest {
    ReconcileRequest {
        sources: vec![source],
        ..Default::default()
    }
}

async fn assert_nothing_left(h: &Harness) {
    assert!(!h.reconciler.migrator().exists_in_olap("stream").await.unwrap());
    let leftovers = h
        .engine
        .information_schema()
        .list(Some(h.engine.staging_schema()))
        .await
        .unwrap();
    assert!(leftovers.is_empty(), "{leftovers:?}");
    assert!(h.catalog.list().await.unwrap().is_empty());
    assert_eq!(h.engine.estimate_size(), 0);
}

#[tokio::test]
async fn quota_stops_a_source_that_is_still_streaming() {
    let config = MigratorConfig {
        ingest_limit_bytes: Some(1),
        watchdog_interval: Duration::from_millis(20),
        batch_size: 10,
        ..Default::default()
    };
    let h = harness(config).await;

    let started = Instant::now();
    let report = h
        .reconciler
        .reconcile(
            request(SourceDefinition::new("stream", "endless")),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    let outcome = report.get("stream").unwrap();
    assert!(
        matches!(
            outcome.error,
            Some(MigrateError::IngestionLimitExceeded { limit_bytes: 1 })
        ),
        "{:?}",
        outcome.error
    );
    assert_nothing_left(&h).await;

    let emitted = h.sink.named("ingestion_ms");
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].tag("limit_exceeded"), Some("true"));
    assert_eq!(emitted[0].tag("failed"), Some("true"));
    assert_eq!(emitted[0].tag("source"), Some("endless"));
}

#[tokio::test]
async fn source_timeout_cancels_the_ingestion() {
    let config = MigratorConfig {
        watchdog_interval: Duration::from_millis(20),
        batch_size: 10,
        ..Default::default()
    };
    let h = harness(config).await;
    let mut source = SourceDefinition::new("stream", "endless");
    source.timeout_seconds = Some(1);

    let started = Instant::now();
    let report = h
        .reconciler
        .reconcile(request(source), &CancellationToken::new())
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(started.elapsed() < Duration::from_secs(10));

    let outcome = report.get("stream").unwrap();
    assert!(
        matches!(outcome.error, Some(MigrateError::Timeout(t)) if t == Duration::from_secs(1)),
        "{:?}",
        outcome.error
    );
    assert_nothing_left(&h).await;

    let emitted = h.sink.named("ingestion_ms");
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].tag("cancelled"), Some("true"));
    assert_eq!(emitted[0].tag("limit_exceeded"), Some("false"));
}
