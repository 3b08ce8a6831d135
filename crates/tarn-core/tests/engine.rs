use std::sync::Arc;
use std::time::Duration;

use tarn_core::metrics::MemorySink;
use tarn_core::{OlapConfig, OlapEngine, Statement, TableName, Value};

async fn engine_with(config: OlapConfig, sink: MemorySink) -> OlapEngine {
    OlapEngine::open(config, Arc::new(sink)).await.unwrap()
}

async fn count(engine: &OlapEngine, table: &TableName) -> usize {
    engine
        .execute(&Statement::new(format!("SELECT * FROM {}", table.quoted())))
        .await
        .unwrap()
        .count_rows()
        .await
        .unwrap()
}

#[tokio::test]
async fn staging_schema_exists_after_open() {
    let engine = engine_with(OlapConfig::default(), MemorySink::new()).await;
    let t = TableName::qualified("tarn_sources", "scratch");
    engine
        .create_table_as_select(&t, "SELECT 1 AS x", false)
        .await
        .unwrap();
    let info = engine.information_schema().lookup(&t).await.unwrap();
    assert_eq!(info.schema, "tarn_sources");
    assert!(!info.view);
}

#[tokio::test]
async fn tables_views_rename_and_drop() {
    let engine = engine_with(OlapConfig::default(), MemorySink::new()).await;
    let staging = TableName::qualified("tarn_sources", "__Orders_1");
    engine
        .create_table_as_select(&staging, "SELECT * FROM (VALUES (1), (2), (3)) AS t(id)", false)
        .await
        .unwrap();
    assert!(engine.estimate_size() > 0);

    let view = TableName::bare("Orders");
    engine
        .create_table_as_select(&view, &format!("SELECT * FROM {}", staging.quoted()), true)
        .await
        .unwrap();
    assert_eq!(count(&engine, &view).await, 3);

    let listed = engine.information_schema().list(None).await.unwrap();
    assert!(listed.iter().any(|t| t.name == "Orders" && t.view && t.schema == "public"));
    assert!(listed.iter().any(|t| t.name == "__Orders_1" && !t.view));

    // Case-sensitive names survive a rename.
    let renamed = TableName::bare("orders");
    engine.rename_table(&view, &renamed).await.unwrap();
    assert!(engine.information_schema().lookup(&view).await.unwrap_err().is_not_found());
    assert_eq!(count(&engine, &renamed).await, 3);

    engine.drop_table(&renamed, true).await.unwrap();
    engine.drop_table(&staging, false).await.unwrap();
    assert_eq!(engine.estimate_size(), 0);
    assert!(engine.information_schema().list(Some("tarn_sources")).await.unwrap().is_empty());

    // Dropping again is not an error.
    engine.drop_table(&staging, false).await.unwrap();
    assert!(engine
        .rename_table(&staging, &renamed)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn queries_emit_telemetry() {
    let sink = MemorySink::new();
    let engine = engine_with(OlapConfig::default(), sink.clone()).await;
    let baseline = sink.named("olap_queries_total").len();

    engine.exec(&Statement::new("SELECT 1")).await.unwrap();
    assert!(engine.exec(&Statement::new("SELECT * FROM missing")).await.is_err());

    let queries = sink.named("olap_queries_total");
    assert_eq!(queries.len(), baseline + 2);
    let ok = &queries[baseline];
    assert_eq!(ok.tag("failed"), Some("false"));
    assert_eq!(ok.tag("cancelled"), Some("false"));
    assert_eq!(ok.tag("instance_id"), Some("default"));
    assert_eq!(queries[baseline + 1].tag("failed"), Some("true"));
    assert!(!sink.named("olap_query_latency_ms").is_empty());
    assert!(!sink.named("olap_queue_latency_ms").is_empty());

    // Dry runs only explain and emit nothing.
    let before = sink.emissions().len();
    let plan = engine
        .execute(&Statement::new("SELECT 1").dry_run(true))
        .await
        .unwrap()
        .count_rows()
        .await
        .unwrap();
    assert!(plan > 0);
    assert_eq!(sink.emissions().len(), before);
}

#[tokio::test]
async fn abandoned_query_is_reported_cancelled() {
    let sink = MemorySink::new();
    let config = OlapConfig {
        olap_pool_size: 1,
        ..OlapConfig::default()
    };
    let engine = engine_with(config, sink.clone()).await;

    let held = engine.pool().acquire_olap_conn(0, false).await.unwrap();
    let waiting = tokio::time::timeout(
        Duration::from_millis(30),
        engine.exec(&Statement::new("SELECT 1")),
    )
    .await;
    assert!(waiting.is_err());
    drop(held);

    let last = sink.named("olap_queries_total").pop().unwrap();
    assert_eq!(last.tag("cancelled"), Some("true"));
    assert_eq!(engine.pool().olap_available(), 1);
}

#[tokio::test]
async fn streaming_results_hold_the_connection() {
    let config = OlapConfig {
        olap_pool_size: 1,
        ..OlapConfig::default()
    };
    let engine = engine_with(config, MemorySink::new()).await;

    let mut result = engine
        .execute(&Statement::new("SELECT * FROM (VALUES (1), (2)) AS t(x)").streaming(true))
        .await
        .unwrap();
    assert!(result.holds_connection());
    assert_eq!(engine.pool().olap_available(), 0);

    while result.next_batch().await.unwrap().is_some() {}
    assert!(!result.holds_connection());
    assert_eq!(engine.pool().olap_available(), 1);

    let collected = engine
        .execute(&Statement::new("SELECT 1"))
        .await
        .unwrap();
    assert!(!collected.holds_connection());
}

#[tokio::test]
async fn streaming_latency_is_reported_when_the_stream_ends() {
    let sink = MemorySink::new();
    let engine = engine_with(OlapConfig::default(), sink.clone()).await;
    let baseline = sink.named("olap_total_latency_ms").len();

    let mut drained = engine
        .execute(&Statement::new("SELECT * FROM (VALUES (1), (2)) AS t(x)").streaming(true))
        .await
        .unwrap();
    assert_eq!(sink.named("olap_total_latency_ms").len(), baseline);
    assert_eq!(sink.named("olap_query_latency_ms").len(), baseline);

    while drained.next_batch().await.unwrap().is_some() {}
    let totals = sink.named("olap_total_latency_ms");
    assert_eq!(totals.len(), baseline + 1);
    assert_eq!(totals[baseline].tag("cancelled"), Some("false"));
    assert_eq!(sink.named("olap_query_latency_ms").len(), baseline + 1);

    // Draining further emits nothing more.
    assert!(drained.next_batch().await.unwrap().is_none());
    assert_eq!(sink.named("olap_total_latency_ms").len(), baseline + 1);

    let mut abandoned = engine
        .execute(&Statement::new("SELECT * FROM (VALUES (1), (2)) AS t(x)").streaming(true))
        .await
        .unwrap();
    assert_eq!(sink.named("olap_total_latency_ms").len(), baseline + 1);
    abandoned.close();
    let totals = sink.named("olap_total_latency_ms");
    assert_eq!(totals.len(), baseline + 2);
    assert_eq!(totals[baseline + 1].tag("cancelled"), Some("true"));
}

#[tokio::test]
async fn positional_arguments_bind_placeholders() {
    let engine = engine_with(OlapConfig::default(), MemorySink::new()).await;
    let rows = engine
        .execute(
            &Statement::new("SELECT * FROM (VALUES (1), (2), (3)) AS t(x) WHERE x > $1")
                .args(vec![Value::Int(1)]),
        )
        .await
        .unwrap()
        .count_rows()
        .await
        .unwrap();
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn view_swaps_are_atomic_for_readers() {
    let engine = Arc::new(engine_with(OlapConfig::default(), MemorySink::new()).await);
    let a = TableName::qualified("tarn_sources", "__swap_1");
    let b = TableName::qualified("tarn_sources", "__swap_2");
    engine
        .create_table_as_select(&a, "SELECT * FROM (VALUES (1), (2)) AS t(x)", false)
        .await
        .unwrap();
    engine
        .create_table_as_select(&b, "SELECT * FROM (VALUES (1), (2), (3), (4)) AS t(x)", false)
        .await
        .unwrap();
    let view = TableName::bare("swap");
    engine
        .create_table_as_select(&view, &format!("SELECT * FROM {}", a.quoted()), true)
        .await
        .unwrap();

    let reader = {
        let engine = Arc::clone(&engine);
        let view = view.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                let n = count(&engine, &view).await;
                assert!(n == 2 || n == 4, "saw {n} rows");
            }
        })
    };
    for i in 0..50 {
        let source = if i % 2 == 0 { &b } else { &a };
        engine
            .create_table_as_select(&view, &format!("SELECT * FROM {}", source.quoted()), true)
            .await
            .unwrap();
    }
    reader.await.unwrap();
}
