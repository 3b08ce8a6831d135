//! Queries the engine runs against itself.
//!
//! File table functions in the query (`read_csv('data/*.csv')` and friends)
//! are registered as temporary file views first, then the rewritten query is
//! materialised into the destination.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{cancellable, TransferError, TransferOutcome, TransferRequest, Transporter};
use crate::cleanup::CleanupReport;
use crate::fileutil::{list_local_files, resolve_local_path};
use crate::handle::LocalFiles;
use crate::iterator::ProgressUnit;
use crate::olap::{OlapEngine, TableName};
use crate::source::prop_str;
use crate::sql_refs::{rewrite_table_functions, table_function_refs, TableFunctionRef};

pub struct SelfToOlap {
    engine: Arc<OlapEngine>,
}

impl SelfToOlap {
    pub fn new(engine: Arc<OlapEngine>) -> Self {
        Self { engine }
    }

    fn local_files(&self, r: &TableFunctionRef, req: &TransferRequest<'_>) -> Result<LocalFiles, TransferError> {
        let mut paths = Vec::new();
        let mut total_bytes = 0;
        for raw in &r.paths {
            if raw.contains("://") {
                return Err(TransferError::Unsupported(format!(
                    "{} cannot read remote path {}",
                    r.function, raw
                )));
            }
            let resolved = resolve_local_path(raw, &req.options.repo_root, req.options.allow_host_access)
                .map_err(TransferError::Source)?;
            for (path, size) in list_local_files(&resolved).map_err(TransferError::Source)? {
                total_bytes += size;
                paths.push(path);
            }
        }
        Ok(LocalFiles {
            paths,
            format: r.format,
            total_bytes,
            delimiter: None,
            has_header: true,
            scratch: None,
        })
    }

    async fn load(
        &self,
        sql: &str,
        registered: &mut Vec<TableName>,
        req: &TransferRequest<'_>,
    ) -> Result<u64, TransferError> {
        let refs = table_function_refs(sql).map_err(TransferError::Source)?;
        let mut total_bytes = 0;
        for (i, r) in refs.iter().enumerate() {
            let files = self.local_files(r, req)?;
            if files.paths.is_empty() {
                return Err(TransferError::NoRows);
            }
            let view = TableName::qualified(
                self.engine.staging_schema(),
                format!("__{}_src_{}", req.destination.name, i),
            );
            self.engine
                .register_files(&view, &files)
                .await
                .map_err(TransferError::Ddl)?;
            total_bytes += files.total_bytes;
            registered.push(view);
        }

        let mut next = 0;
        let rewritten = rewrite_table_functions(sql, |_| {
            let view = registered
                .get(next)
                .ok_or_else(|| anyhow::anyhow!("table function {} was not registered", next))?;
            next += 1;
            Ok(vec![self.engine.staging_schema().to_string(), view.name.clone()])
        })
        .map_err(TransferError::Source)?;
        debug!("Rewrote source query to: {}", rewritten);

        if total_bytes > 0 {
            req.progress.set_target(total_bytes, ProgressUnit::Bytes);
        }
        cancellable(
            &req.cancel,
            self.engine
                .create_table_as_select(req.destination, &rewritten, false),
        )
        .await?
        .map_err(TransferError::Ddl)?;
        req.progress.observe(total_bytes, ProgressUnit::Bytes);
        Ok(total_bytes)
    }
}

#[async_trait]
impl Transporter for SelfToOlap {
    fn name(&self) -> &'static str {
        "self_to_olap"
    }

    async fn transfer(&self, req: TransferRequest<'_>) -> Result<TransferOutcome, TransferError> {
        let sql = prop_str(&req.request.properties, "sql")
            .ok_or_else(|| TransferError::Unsupported("property \"sql\" is mandatory".to_string()))?
            .to_string();

        let mut registered = Vec::new();
        let result = self.load(&sql, &mut registered, &req).await;

        let mut cleanup = CleanupReport::new();
        for view in &registered {
            cleanup.record(
                format!("drop source view {}", view),
                self.engine.drop_table(view, true).await,
            );
        }
        cleanup.log();

        let bytes = result?;
        info!("Materialised query into {}", req.destination);
        Ok(TransferOutcome { rows: None, bytes })
    }
}
