//! Generic row-by-row transfer through a temporary staging table.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{cancellable, TransferError, TransferOutcome, TransferRequest, Transporter};
use crate::cleanup::CleanupReport;
use crate::dialect::{quote_identifier, Dialect};
use crate::iterator::{IteratorError, ProgressUnit, RowIterator};
use crate::olap::{OlapEngine, Statement, TableName};
use crate::types::{Row, StructType, Type, TypeCode, Value};

pub struct RowIteratorToOlap {
    engine: Arc<OlapEngine>,
}

impl RowIteratorToOlap {
    pub fn new(engine: Arc<OlapEngine>) -> Self {
        Self { engine }
    }

    fn temp_table(&self, destination: &TableName) -> TableName {
        TableName::qualified(
            self.engine.staging_schema(),
            format!("__{}_tmp_rows", destination.name),
        )
    }

    async fn load(
        &self,
        it: &mut dyn RowIterator,
        tmp: &TableName,
        req: &TransferRequest<'_>,
    ) -> Result<TransferOutcome, TransferError> {
        let schema = match cancellable(&req.cancel, it.schema()).await? {
            Ok(schema) => schema,
            Err(IteratorError::Done) => return Err(TransferError::NoRows),
            Err(IteratorError::Source(e)) => return Err(TransferError::Iterator(e)),
        };
        if let Some(total) = it.size(ProgressUnit::Bytes) {
            req.progress.set_target(total, ProgressUnit::Bytes);
        } else if let Some(total) = it.size(ProgressUnit::Records) {
            req.progress.set_target(total, ProgressUnit::Records);
        }

        let ddl = Statement::new(create_table_sql(tmp, &schema, self.engine.dialect())?)
            .priority(1)
            .long_running(true);
        self.engine.exec(&ddl).await.map_err(TransferError::Ddl)?;

        let mut appender = self
            .engine
            .appender(tmp, req.options.batch_size)
            .await
            .map_err(TransferError::Ddl)?;
        let mut rows = 0u64;
        loop {
            let row = match cancellable(&req.cancel, it.next()).await? {
                Ok(row) => row,
                Err(IteratorError::Done) => break,
                Err(IteratorError::Source(e)) => return Err(TransferError::Iterator(e)),
            };
            let row = coerce_row(row, &schema);
            if let Some(bytes) = appender.append(row).await.map_err(TransferError::Append)? {
                req.progress.observe(bytes, ProgressUnit::Bytes);
            }
            rows += 1;
            req.progress.observe(1, ProgressUnit::Records);
        }
        let bytes = appender.flush().await.map_err(TransferError::Append)?;
        req.progress.observe(bytes, ProgressUnit::Bytes);
        let bytes_written = appender.bytes_written();
        drop(appender);

        if req.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        debug!("Appended {} rows into {}", rows, tmp);
        let select = format!("SELECT * FROM {}", tmp.quoted());
        self.engine
            .create_table_as_select(req.destination, &select, false)
            .await
            .map_err(TransferError::Ddl)?;

        Ok(TransferOutcome {
            rows: Some(rows),
            bytes: bytes_written,
        })
    }
}

#[async_trait]
impl Transporter for RowIteratorToOlap {
    fn name(&self) -> &'static str {
        "rows_to_olap"
    }

    async fn transfer(&self, req: TransferRequest<'_>) -> Result<TransferOutcome, TransferError> {
        let mut it = req
            .source
            .query(req.request)
            .await
            .map_err(TransferError::Source)?;
        let tmp = self.temp_table(req.destination);

        let result = self
            .engine
            .with_connection(1, true, self.load(it.as_mut(), &tmp, &req))
            .await
            .map_err(TransferError::Ddl)
            .and_then(|r| r);

        let mut cleanup = CleanupReport::new();
        cleanup.record("drop temporary table", self.engine.drop_table(&tmp, false).await);
        cleanup.record("close iterator", it.close().await);
        cleanup.log();

        if let Ok(outcome) = &result {
            info!(
                "Transferred {} rows from {} into {}",
                outcome.rows.unwrap_or(0),
                req.source.driver(),
                req.destination
            );
        }
        result
    }
}

fn create_table_sql(table: &TableName, schema: &StructType, dialect: Dialect) -> Result<String, TransferError> {
    let columns = schema
        .fields
        .iter()
        .map(|f| Ok(format!("{} {}", quote_identifier(&f.name), dialect.from_canonical(&f.ty)?)))
        .collect::<Result<Vec<_>, TransferError>>()?;
    Ok(format!(
        "CREATE OR REPLACE TABLE {} ({})",
        table.quoted(),
        columns.join(", ")
    ))
}

fn coerce_row(row: Row, schema: &StructType) -> Row {
    row.into_iter()
        .zip(schema.fields.iter())
        .map(|(value, field)| coerce_value(value, &field.ty))
        .collect()
}

/// Adapt values the engine cannot store natively for the column type.
fn coerce_value(value: Value, ty: &Type) -> Value {
    match (value, ty.code) {
        (Value::Fixed16(bytes), TypeCode::Uuid) => {
            Value::Str(uuid::Uuid::from_bytes(bytes).hyphenated().to_string())
        }
        (Value::List(items), TypeCode::Array) => match ty.array_element_type.as_deref() {
            Some(elem) => Value::List(items.into_iter().map(|v| coerce_value(v, elem)).collect()),
            None => Value::List(items),
        },
        (value, _) => value,
    }
}
