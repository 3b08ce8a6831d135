//! Bulk load of local files with the engine's own readers.
//!
//! When the request carries a `sql` property (a remote SQL source fetched by
//! its object store connector), the query runs over the fetched files with
//! its table function replaced by the file view.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{cancellable, TransferError, TransferOutcome, TransferRequest, Transporter};
use crate::cleanup::CleanupReport;
use crate::handle::LocalFiles;
use crate::iterator::ProgressUnit;
use crate::olap::{OlapEngine, TableName};
use crate::source::{prop_str, prop_u64};
use crate::sql_refs::rewrite_table_functions;

pub struct FilesToOlap {
    engine: Arc<OlapEngine>,
}

impl FilesToOlap {
    pub fn new(engine: Arc<OlapEngine>) -> Self {
        Self { engine }
    }

    async fn load(
        &self,
        files: &LocalFiles,
        view: &TableName,
        req: &TransferRequest<'_>,
    ) -> Result<(), TransferError> {
        self.engine
            .register_files(view, files)
            .await
            .map_err(TransferError::Ddl)?;

        let mut select = match prop_str(&req.request.properties, "sql") {
            Some(sql) => {
                let rewritten = rewrite_table_functions(sql, |_| {
                    Ok(vec![self.engine.staging_schema().to_string(), view.name.clone()])
                })
                .map_err(TransferError::Source)?;
                debug!("Rewrote source query to: {}", rewritten);
                rewritten
            }
            None => format!("SELECT * FROM {}", view.quoted()),
        };
        if let Some(limit) = prop_u64(&req.request.properties, "limit") {
            select = format!("SELECT * FROM ({}) LIMIT {}", select, limit);
        }
        cancellable(
            &req.cancel,
            self.engine
                .create_table_as_select(req.destination, &select, false),
        )
        .await?
        .map_err(TransferError::Ddl)
    }
}

#[async_trait]
impl Transporter for FilesToOlap {
    fn name(&self) -> &'static str {
        "files_to_olap"
    }

    async fn transfer(&self, req: TransferRequest<'_>) -> Result<TransferOutcome, TransferError> {
        let files = cancellable(&req.cancel, req.source.fetch_files(req.request))
            .await?
            .map_err(TransferError::Source)?;
        if files.paths.is_empty() {
            return Err(TransferError::NoRows);
        }
        req.progress.set_target(files.total_bytes, ProgressUnit::Bytes);

        let view = TableName::qualified(
            self.engine.staging_schema(),
            format!("__{}_files", req.destination.name),
        );
        let result = self.load(&files, &view, &req).await;

        let mut cleanup = CleanupReport::new();
        cleanup.record("drop file view", self.engine.drop_table(&view, true).await);
        cleanup.log();
        result?;

        req.progress.observe(files.total_bytes, ProgressUnit::Bytes);
        info!(
            "Loaded {} file(s) ({} bytes) into {}",
            files.paths.len(),
            files.total_bytes,
            req.destination
        );
        Ok(TransferOutcome {
            rows: None,
            bytes: files.total_bytes,
        })
    }
}
