//! OLAP engine built on DataFusion.
//!
//! One [`SessionContext`] is the shared database. Every statement goes
//! through the [`ConnectionPool`] so admission, priority and long-running
//! limits apply uniformly. Catalog mutations that DataFusion performs as a
//! deregister/register pair (view swaps, drops, renames) take the catalog
//! lock exclusively, so readers never plan against a half-replaced name.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::datasource::MemTable;
use datafusion::prelude::*;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::appender::{natural_scalar, Appender};
use super::pool::{Conn, ConnectionPool};
use super::statement::{QueryResult, QueryTelemetry, Statement, CLEANUP_PRIORITY};
use super::TableName;
use crate::config::OlapConfig;
use crate::dialect::Dialect;
use crate::error::OlapError;
use crate::handle::{Capabilities, Capability, FileFormat, LocalFiles, SourceHandle};
use crate::metrics::ActivitySink;

/// Driver name the engine answers to when used as a source.
pub const ENGINE_DRIVER: &str = "datafusion";

/// Schema holding externally visible views.
pub const DEFAULT_SCHEMA: &str = "public";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn for_query(query: &str) -> Self {
        let head: String = query
            .trim_start()
            .chars()
            .take(32)
            .collect::<String>()
            .to_ascii_uppercase();
        let head = head.split_whitespace().collect::<Vec<_>>().join(" ");
        if head.starts_with("DROP ")
            || head.starts_with("ALTER ")
            || head.starts_with("CREATE OR REPLACE ")
            || head.starts_with("CREATE VIEW ")
        {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        }
    }
}

/// A table or view as reported by the information schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub view: bool,
}

impl TableInfo {
    pub fn table_name(&self) -> TableName {
        if self.schema == DEFAULT_SCHEMA {
            TableName::bare(self.name.clone())
        } else {
            TableName::qualified(&self.schema, self.name.clone())
        }
    }
}

pub struct OlapEngine {
    ctx: SessionContext,
    pool: ConnectionPool,
    config: OlapConfig,
    activity: Arc<dyn ActivitySink>,
    catalog_lock: RwLock<()>,
    sizes: Mutex<HashMap<String, u64>>,
}

impl OlapEngine {
    /// Open an engine and make sure the staging schema exists.
    pub async fn open(config: OlapConfig, activity: Arc<dyn ActivitySink>) -> Result<Self, OlapError> {
        let ctx = SessionContext::new_with_config(
            SessionConfig::new().with_information_schema(true),
        );
        let engine = Self {
            ctx,
            pool: ConnectionPool::new(
                config.meta_pool_size,
                config.olap_pool_size,
                config.long_running_slots,
            ),
            config,
            activity,
            catalog_lock: RwLock::new(()),
            sizes: Mutex::new(HashMap::new()),
        };
        let staging = engine.config.staging_schema.clone();
        engine.create_schema_if_missing(&staging).await?;

        info!(
            "OlapEngine {} initialized (olap slots: {}, meta slots: {}, staging schema: {})",
            engine.config.instance_id,
            engine.config.olap_pool_size,
            engine.config.meta_pool_size,
            staging
        );
        Ok(engine)
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::DataFusion
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn config(&self) -> &OlapConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn staging_schema(&self) -> &str {
        &self.config.staging_schema
    }

    /// Run `fut` with one OLAP connection bound for its whole duration.
    pub async fn with_connection<F, T>(&self, priority: i32, long_running: bool, fut: F) -> Result<T, OlapError>
    where
        F: Future<Output = T>,
    {
        self.pool.with_connection(priority, long_running, fut).await
    }

    // -----------------------------------------------------------------------
    // Statement execution
    // -----------------------------------------------------------------------

    /// Run a statement to completion, discarding any rows.
    pub async fn exec(&self, stmt: &Statement) -> Result<(), OlapError> {
        self.execute(stmt).await?.collect().await.map(|_| ())
    }

    pub async fn execute(&self, stmt: &Statement) -> Result<QueryResult, OlapError> {
        self.execute_with(stmt, LockMode::for_query(&stmt.query)).await
    }

    async fn execute_with(&self, stmt: &Statement, lock: LockMode) -> Result<QueryResult, OlapError> {
        if stmt.dry_run {
            let _conn = self.pool.acquire_meta_conn().await?;
            let explain = Statement {
                query: format!("EXPLAIN {}", stmt.query),
                dry_run: false,
                streaming: false,
                ..stmt.clone()
            };
            return self.run(&explain, LockMode::Shared, None).await;
        }

        if self.config.log_queries {
            info!("olap query (priority {}): {}", stmt.priority, stmt.query);
        }

        let mut telemetry = QueryTelemetry::start(self.activity.clone(), &self.config.instance_id);
        let conn = match self.pool.acquire_olap_conn(stmt.priority, stmt.long_running).await {
            Ok(conn) => conn,
            Err(e) => {
                telemetry.finish(true);
                return Err(e);
            }
        };
        telemetry.acquired();

        let fut = self.run(stmt, lock, Some(conn));
        let result = match stmt.execution_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or(Err(OlapError::Timeout(limit))),
            None => fut.await,
        };
        match result {
            // Streams report their latency once drained or closed.
            Ok(result) if result.holds_connection() => Ok(result.with_telemetry(telemetry)),
            result => {
                telemetry.finish(result.is_err());
                result
            }
        }
    }

    async fn run(&self, stmt: &Statement, lock: LockMode, conn: Option<Conn>) -> Result<QueryResult, OlapError> {
        let df = match lock {
            LockMode::Shared => {
                let _guard = self.catalog_lock.read().await;
                self.plan(stmt).await?
            }
            LockMode::Exclusive => {
                let _guard = self.catalog_lock.write().await;
                self.plan(stmt).await?
            }
        };
        let schema: SchemaRef = df.schema().inner().clone();

        match (stmt.streaming, conn) {
            (true, Some(conn)) => {
                let stream = df.execute_stream().await?;
                Ok(QueryResult::streaming(schema, stream, conn))
            }
            (_, conn) => {
                let batches = df.collect().await?;
                drop(conn);
                Ok(QueryResult::collected(schema, batches))
            }
        }
    }

    async fn plan(&self, stmt: &Statement) -> Result<DataFrame, OlapError> {
        let df = self.ctx.sql(&stmt.query).await?;
        if stmt.args.is_empty() {
            return Ok(df);
        }
        let params: Vec<_> = stmt.args.iter().map(natural_scalar).collect();
        Ok(df.with_param_values(params)?)
    }

    // -----------------------------------------------------------------------
    // Table management
    // -----------------------------------------------------------------------

    pub async fn create_schema_if_missing(&self, schema: &str) -> Result<(), OlapError> {
        let stmt = Statement::new(format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            crate::dialect::quote_identifier(schema)
        ))
        .priority(1);
        self.exec(&stmt).await
    }

    /// Materialise `select` into `table`, or define `table` as a view over
    /// it. An existing object with the same name is replaced.
    pub async fn create_table_as_select(&self, table: &TableName, select: &str, view: bool) -> Result<(), OlapError> {
        if view {
            let stmt = Statement::new(format!("CREATE OR REPLACE VIEW {} AS {}", table.quoted(), select)).priority(1);
            return self.exec(&stmt).await;
        }

        let stmt = Statement::new(select).priority(1).long_running(true);
        let result = self.execute_with(&stmt, LockMode::Shared).await?;
        let schema = result.schema().clone();
        let batches = result.collect().await?;
        self.replace_table(table, schema, batches).await
    }

    async fn replace_table(&self, table: &TableName, schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<(), OlapError> {
        let bytes: u64 = batches.iter().map(|b| b.get_array_memory_size() as u64).sum();
        let provider = Arc::new(MemTable::try_new(schema, vec![batches])?);
        {
            let _guard = self.catalog_lock.write().await;
            if self.ctx.table_exist(table.reference())? {
                self.ctx.deregister_table(table.reference())?;
            }
            self.ctx.register_table(table.reference(), provider)?;
        }
        self.set_table_size(table, Some(bytes));
        debug!("Materialised {} ({} bytes)", table, bytes);
        Ok(())
    }

    /// Drop a table or view. Missing objects are not an error.
    pub async fn drop_table(&self, table: &TableName, view: bool) -> Result<(), OlapError> {
        let kind = if view { "VIEW" } else { "TABLE" };
        let stmt = Statement::new(format!("DROP {} IF EXISTS {}", kind, table.quoted())).priority(CLEANUP_PRIORITY);
        self.exec(&stmt).await?;
        if !view {
            self.set_table_size(table, None);
        }
        Ok(())
    }

    /// Rename a table or view. An existing object named `to` is replaced.
    pub async fn rename_table(&self, from: &TableName, to: &TableName) -> Result<(), OlapError> {
        let _conn = self.pool.acquire_olap_conn(1, false).await?;
        {
            let _guard = self.catalog_lock.write().await;
            if !self.ctx.table_exist(from.reference())? {
                return Err(OlapError::NotFound(from.to_string()));
            }
            let provider = self.ctx.table_provider(from.reference()).await?;
            if self.ctx.table_exist(to.reference())? {
                self.ctx.deregister_table(to.reference())?;
            }
            self.ctx.register_table(to.reference(), provider)?;
            self.ctx.deregister_table(from.reference())?;
        }
        let mut sizes = self.lock_sizes();
        if let Some(bytes) = sizes.remove(&from.key()) {
            sizes.insert(to.key(), bytes);
        } else {
            sizes.remove(&to.key());
        }
        Ok(())
    }

    /// Expose local files as a view named `table`.
    pub async fn register_files(&self, table: &TableName, files: &LocalFiles) -> Result<(), OlapError> {
        if files.paths.is_empty() {
            return Err(OlapError::NotFound("no files to register".to_string()));
        }
        let paths: Vec<String> = files
            .paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        let df = {
            let _conn = self.pool.acquire_meta_conn().await?;
            match files.format {
                FileFormat::Csv => {
                    let mut options = CsvReadOptions::new()
                        .has_header(files.has_header)
                        .file_extension("");
                    if let Some(delimiter) = files.delimiter {
                        options = options.delimiter(delimiter);
                    }
                    self.ctx.read_csv(paths, options).await?
                }
                FileFormat::Parquet => {
                    let options = ParquetReadOptions {
                        file_extension: "",
                        ..Default::default()
                    };
                    self.ctx.read_parquet(paths, options).await?
                }
                FileFormat::Json => {
                    let options = NdJsonReadOptions {
                        file_extension: "",
                        ..Default::default()
                    };
                    self.ctx.read_json(paths, options).await?
                }
            }
        };

        let _guard = self.catalog_lock.write().await;
        if self.ctx.table_exist(table.reference())? {
            self.ctx.deregister_table(table.reference())?;
        }
        self.ctx.register_table(table.reference(), df.into_view())?;
        Ok(())
    }

    pub fn information_schema(&self) -> InformationSchema<'_> {
        InformationSchema { engine: self }
    }

    /// Bytes held by tables this engine materialised.
    pub fn estimate_size(&self) -> u64 {
        self.lock_sizes().values().sum()
    }

    /// Buffered appender into an existing table.
    pub async fn appender(&self, table: &TableName, batch_size: usize) -> Result<Appender<'_>, OlapError> {
        if !self.ctx.table_exist(table.reference())? {
            return Err(OlapError::NotFound(table.to_string()));
        }
        let schema = self.ctx.table_provider(table.reference()).await?.schema();
        Ok(Appender::new(self, table.clone(), schema, batch_size))
    }

    /// Shared catalog access for appenders writing into a table.
    pub(crate) async fn read_catalog(&self) -> tokio::sync::RwLockReadGuard<'_, ()> {
        self.catalog_lock.read().await
    }

    pub(crate) fn add_table_size(&self, table: &TableName, bytes: u64) {
        *self.lock_sizes().entry(table.key()).or_insert(0) += bytes;
    }

    fn set_table_size(&self, table: &TableName, bytes: Option<u64>) {
        let mut sizes = self.lock_sizes();
        match bytes {
            Some(b) => {
                sizes.insert(table.key(), b);
            }
            None => {
                sizes.remove(&table.key());
            }
        }
    }

    fn lock_sizes(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.sizes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Information schema
// ---------------------------------------------------------------------------

pub struct InformationSchema<'a> {
    engine: &'a OlapEngine,
}

impl InformationSchema<'_> {
    /// All user tables and views, optionally limited to one schema.
    pub async fn list(&self, schema: Option<&str>) -> Result<Vec<TableInfo>, OlapError> {
        let engine = self.engine;
        let _conn = engine.pool.acquire_meta_conn().await?;
        let df = {
            let _guard = engine.catalog_lock.read().await;
            engine
                .ctx
                .sql("SELECT table_schema, table_name, table_type FROM information_schema.tables")
                .await?
        };
        let batches = df.collect().await?;

        let mut out = Vec::new();
        for batch in &batches {
            let schemas = cast(batch.column(0), &DataType::Utf8)?;
            let names = cast(batch.column(1), &DataType::Utf8)?;
            let types = cast(batch.column(2), &DataType::Utf8)?;
            let (schemas, names, types) = (
                schemas.as_string::<i32>(),
                names.as_string::<i32>(),
                types.as_string::<i32>(),
            );
            for i in 0..batch.num_rows() {
                if schemas.is_null(i) || names.is_null(i) {
                    continue;
                }
                let table_schema = schemas.value(i);
                if table_schema == "information_schema" {
                    continue;
                }
                if schema.is_some_and(|s| s != table_schema) {
                    continue;
                }
                out.push(TableInfo {
                    schema: table_schema.to_string(),
                    name: names.value(i).to_string(),
                    view: !types.is_null(i) && types.value(i) == "VIEW",
                });
            }
        }
        out.sort_by(|a, b| (&a.schema, &a.name).cmp(&(&b.schema, &b.name)));
        Ok(out)
    }

    pub async fn lookup(&self, table: &TableName) -> Result<TableInfo, OlapError> {
        let schema = table.schema_or_default();
        self.list(Some(schema))
            .await?
            .into_iter()
            .find(|t| t.name == table.name)
            .ok_or_else(|| OlapError::NotFound(table.to_string()))
    }
}

// ---------------------------------------------------------------------------
// The engine as a source
// ---------------------------------------------------------------------------

#[async_trait]
impl SourceHandle for OlapEngine {
    fn driver(&self) -> &str {
        ENGINE_DRIVER
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new([Capability::NativeQuery])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_lock_for_catalog_swaps() {
        assert_eq!(LockMode::for_query("  drop view x"), LockMode::Exclusive);
        assert_eq!(
            LockMode::for_query("CREATE  OR\nREPLACE VIEW v AS SELECT 1"),
            LockMode::Exclusive
        );
        assert_eq!(LockMode::for_query("ALTER TABLE t RENAME TO u"), LockMode::Exclusive);
        assert_eq!(LockMode::for_query("SELECT * FROM dropped"), LockMode::Shared);
        assert_eq!(LockMode::for_query("CREATE TABLE t (a INT)"), LockMode::Shared);
    }
}
