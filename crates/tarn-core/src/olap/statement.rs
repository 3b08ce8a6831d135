//! Statements submitted to the engine and the results they produce.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use datafusion::physical_plan::SendableRecordBatchStream;
use futures::StreamExt;

use super::pool::Conn;
use crate::dialect::{datafusion::schema_from_arrow, DialectError};
use crate::error::OlapError;
use crate::metrics::{ActivitySink, Tag};
use crate::types::{StructType, Value};

/// Priority used for cleanup work that should not wait behind user queries.
pub const CLEANUP_PRIORITY: i32 = 100;

#[derive(Debug, Clone, Default)]
pub struct Statement {
    pub query: String,
    /// Bound to `$1..$n` placeholders.
    pub args: Vec<Value>,
    pub priority: i32,
    /// Route to the metadata pool and only `EXPLAIN` the query.
    pub dry_run: bool,
    /// Bounds query execution only, never connection acquisition.
    pub execution_timeout: Option<Duration>,
    pub long_running: bool,
    /// Keep the connection until the caller has drained the rows.
    pub streaming: bool,
}

impl Statement {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn long_running(mut self, long_running: bool) -> Self {
        self.long_running = long_running;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

enum Rows {
    Stream(SendableRecordBatchStream),
    Batches(VecDeque<RecordBatch>),
}

/// Rows returned by [`super::OlapEngine::execute`].
///
/// A streaming result keeps its connection until the stream is exhausted,
/// [`QueryResult::close`] is called, or the result is dropped. Its query
/// metrics are emitted at that point.
pub struct QueryResult {
    schema: SchemaRef,
    rows: Rows,
    conn: Option<Conn>,
    telemetry: Option<QueryTelemetry>,
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("schema", &self.schema)
            .field("holds_connection", &self.conn.is_some())
            .finish()
    }
}

impl QueryResult {
    pub(crate) fn streaming(schema: SchemaRef, stream: SendableRecordBatchStream, conn: Conn) -> Self {
        Self {
            schema,
            rows: Rows::Stream(stream),
            conn: Some(conn),
            telemetry: None,
        }
    }

    pub(crate) fn with_telemetry(mut self, telemetry: QueryTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub(crate) fn collected(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self {
            schema,
            rows: Rows::Batches(batches.into()),
            conn: None,
            telemetry: None,
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn canonical_schema(&self) -> Result<StructType, DialectError> {
        schema_from_arrow(&self.schema)
    }

    pub fn holds_connection(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn next_batch(&mut self) -> Result<Option<RecordBatch>, OlapError> {
        match &mut self.rows {
            Rows::Batches(q) => Ok(q.pop_front()),
            Rows::Stream(stream) => match stream.next().await {
                Some(Ok(batch)) => Ok(Some(batch)),
                Some(Err(e)) => {
                    self.release(true);
                    Err(e.into())
                }
                None => {
                    self.release(false);
                    Ok(None)
                }
            },
        }
    }

    pub async fn collect(mut self) -> Result<Vec<RecordBatch>, OlapError> {
        let mut out = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            out.push(batch);
        }
        Ok(out)
    }

    /// Total rows, draining the result.
    pub async fn count_rows(self) -> Result<usize, OlapError> {
        Ok(self.collect().await?.iter().map(|b| b.num_rows()).sum())
    }

    /// Stop reading and hand the connection back. A stream closed before
    /// it was exhausted is reported as cancelled.
    pub fn close(&mut self) {
        self.rows = Rows::Batches(VecDeque::new());
        self.conn = None;
        self.telemetry = None;
    }

    fn release(&mut self, failed: bool) {
        self.rows = Rows::Batches(VecDeque::new());
        self.conn = None;
        if let Some(mut telemetry) = self.telemetry.take() {
            telemetry.finish(failed);
        }
    }
}

/// Emits query metrics exactly once. Dropping it unfinished means the
/// caller abandoned the query, which is reported as cancelled.
pub(crate) struct QueryTelemetry {
    activity: Arc<dyn ActivitySink>,
    instance_id: String,
    start: Instant,
    acquired: Option<Instant>,
    done: bool,
}

impl QueryTelemetry {
    pub(crate) fn start(activity: Arc<dyn ActivitySink>, instance_id: &str) -> Self {
        Self {
            activity,
            instance_id: instance_id.to_string(),
            start: Instant::now(),
            acquired: None,
            done: false,
        }
    }

    pub(crate) fn acquired(&mut self) {
        self.acquired = Some(Instant::now());
    }

    pub(crate) fn finish(&mut self, failed: bool) {
        self.emit(false, failed);
        self.done = true;
    }

    fn emit(&self, cancelled: bool, failed: bool) {
        let tags = [
            Tag::new("instance_id", &self.instance_id),
            Tag::new("cancelled", cancelled),
            Tag::new("failed", failed),
        ];
        let now = Instant::now();
        let queued_until = self.acquired.unwrap_or(now);

        self.activity.emit("olap_queries_total", 1.0, &tags);
        self.activity.emit(
            "olap_queue_latency_ms",
            queued_until.duration_since(self.start).as_secs_f64() * 1000.0,
            &tags,
        );
        self.activity.emit(
            "olap_total_latency_ms",
            now.duration_since(self.start).as_secs_f64() * 1000.0,
            &tags,
        );
        if let Some(acquired) = self.acquired {
            self.activity.emit(
                "olap_query_latency_ms",
                now.duration_since(acquired).as_secs_f64() * 1000.0,
                &tags,
            );
        }
    }
}

impl Drop for QueryTelemetry {
    fn drop(&mut self) {
        if !self.done {
            self.emit(true, false);
        }
    }
}
