use std::path::Path;
use std::sync::Arc;

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use tarn_connectors::{default_registry, ConnectorConfig};
use tarn_core::metrics::noop_sink;
use tarn_core::{
    select_transporter, ExtractPolicy, FileFormat, OlapConfig, OlapEngine, Progress, SourceRequest,
    Statement, Strategy, TableName, TransferOptions, TransferRequest, Value,
};

fn write_parquet(path: &Path) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("label", DataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3, 4])),
            Arc::new(StringArray::from(vec![Some("a"), None, Some("c"), Some("d")])),
        ],
    )
    .unwrap();
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

fn request(props: serde_json::Value) -> SourceRequest {
    let mut req = SourceRequest::default();
    if let serde_json::Value::Object(map) = props {
        req.properties.extend(map);
    }
    req
}

fn config(root: &Path) -> ConnectorConfig {
    ConnectorConfig {
        repo_root: root.to_path_buf(),
        ..Default::default()
    }
}

#[tokio::test]
async fn glob_with_files_policy_keeps_newest_files() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("events")).unwrap();
    for day in ["01", "02", "03"] {
        std::fs::write(
            root.path().join(format!("events/2024-01-{day}.csv")),
            format!("day,n\n{day},1\n"),
        )
        .unwrap();
    }

    let handle = default_registry().open("local_file", &config(root.path())).await.unwrap();
    let mut req = request(json!({"path": "events/*.csv"}));
    req.extract_policy = ExtractPolicy {
        files_strategy: Strategy::Tail,
        files_limit: 2,
        ..Default::default()
    };
    let files = handle.fetch_files(&req).await.unwrap();
    assert_eq!(files.format, FileFormat::Csv);
    let names: Vec<_> = files
        .paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["2024-01-02.csv", "2024-01-03.csv"]);
    assert!(files.scratch.is_none());
}

#[tokio::test]
async fn rows_policy_trims_copies_not_sources() {
    let root = tempfile::tempdir().unwrap();
    let source = root.path().join("big.csv");
    std::fs::write(&source, "id,v\n1,a\n2,b\n3,c\n").unwrap();

    let handle = default_registry().open("local_file", &config(root.path())).await.unwrap();
    let mut req = request(json!({"path": "big.csv"}));
    req.extract_policy = ExtractPolicy {
        rows_strategy: Strategy::Head,
        rows_limit_bytes: 10,
        ..Default::default()
    };
    let files = handle.fetch_files(&req).await.unwrap();
    assert_eq!(std::fs::read_to_string(&files.paths[0]).unwrap(), "id,v\n1,a\n");
    assert_eq!(std::fs::read_to_string(&source).unwrap(), "id,v\n1,a\n2,b\n3,c\n");
    assert!(files.scratch.is_some());
}

#[tokio::test]
async fn paths_outside_root_need_host_access() {
    let root = tempfile::tempdir().unwrap();
    let handle = default_registry().open("local_file", &config(root.path())).await.unwrap();
    let err = handle
        .fetch_files(&request(json!({"path": "/etc/hosts"})))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("outside root"), "{err}");
}

#[tokio::test]
async fn csv_rows_iterate_as_strings() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("a.csv"), "id,name\n1,alpha\n2,\n").unwrap();
    std::fs::write(root.path().join("b.csv"), "id,name\n3,gamma\n").unwrap();

    let handle = default_registry().open("local_file", &config(root.path())).await.unwrap();
    let mut it = handle.query(&request(json!({"path": "*.csv"}))).await.unwrap();
    let schema = it.schema().await.unwrap();
    assert_eq!(schema.names().collect::<Vec<_>>(), vec!["id", "name"]);

    let mut rows = vec![];
    loop {
        match it.next().await {
            Ok(row) => rows.push(row),
            Err(e) if e.is_done() => break,
            Err(e) => panic!("{e}"),
        }
    }
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1], vec![Value::Str("2".into()), Value::Null]);
    assert_eq!(rows[2][1], Value::Str("gamma".into()));
    it.close().await.unwrap();
    it.close().await.unwrap();
}

#[tokio::test]
async fn parquet_files_load_into_the_engine() {
    let root = tempfile::tempdir().unwrap();
    write_parquet(&root.path().join("items.parquet"));

    let engine = Arc::new(OlapEngine::open(OlapConfig::default(), noop_sink()).await.unwrap());
    let handle = default_registry().open("local_file", &config(root.path())).await.unwrap();
    let caps = handle.capabilities();
    let transporter = select_transporter(&engine, handle.as_ref(), &caps).unwrap();
    assert_eq!(transporter.name(), "files_to_olap");

    let req = request(json!({"path": "items.parquet"}));
    let dest = TableName::qualified("tarn_sources", "__items_1");
    transporter
        .transfer(TransferRequest {
            source: handle.as_ref(),
            request: &req,
            destination: &dest,
            cancel: CancellationToken::new(),
            progress: Arc::new(Progress::new()),
            options: TransferOptions::default(),
        })
        .await
        .unwrap();

    let batches = engine
        .execute(&Statement::new(format!(
            "SELECT count(*) AS n, count(label) AS labelled FROM {}",
            dest.quoted()
        )))
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    let n = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    let labelled = batches[0]
        .column(1)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(n.value(0), 4);
    assert_eq!(labelled.value(0), 3);
}

#[tokio::test]
async fn inline_rows_flow_through_the_row_transporter() {
    let engine = Arc::new(OlapEngine::open(OlapConfig::default(), noop_sink()).await.unwrap());
    let handle = default_registry()
        .open("inline", &ConnectorConfig::default())
        .await
        .unwrap();
    let caps = handle.capabilities();
    let transporter = select_transporter(&engine, handle.as_ref(), &caps).unwrap();
    assert_eq!(transporter.name(), "rows_to_olap");

    let req = request(json!({
        "columns": [{"name": "id", "type": "BIGINT"}, {"name": "label", "type": "VARCHAR"}],
        "rows": [[1, "a"], [2, "b"], [3, null]]
    }));
    let dest = TableName::qualified("tarn_sources", "__inline_1");
    let outcome = transporter
        .transfer(TransferRequest {
            source: handle.as_ref(),
            request: &req,
            destination: &dest,
            cancel: CancellationToken::new(),
            progress: Arc::new(Progress::new()),
            options: TransferOptions::default(),
        })
        .await
        .unwrap();
    assert_eq!(outcome.rows, Some(3));
}
