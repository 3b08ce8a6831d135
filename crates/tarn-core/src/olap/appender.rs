//! Buffered row appends into an engine table.

use arrow::array::ArrayRef;
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{NaiveDate, Timelike};
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::scalar::ScalarValue;

use super::{OlapEngine, TableName};
use crate::error::OlapError;
use crate::types::{Row, Value};

/// Accumulates rows and writes them to the table in batches.
pub struct Appender<'a> {
    engine: &'a OlapEngine,
    table: TableName,
    schema: SchemaRef,
    buffer: Vec<Row>,
    batch_size: usize,
    rows_written: u64,
    bytes_written: u64,
}

impl<'a> Appender<'a> {
    pub(crate) fn new(
        engine: &'a OlapEngine,
        table: TableName,
        schema: SchemaRef,
        batch_size: usize,
    ) -> Self {
        Self {
            engine,
            table,
            schema,
            buffer: Vec::with_capacity(batch_size.min(65_536)),
            batch_size: batch_size.max(1),
            rows_written: 0,
            bytes_written: 0,
        }
    }

    /// Buffer one row. Returns the bytes written when this append triggered
    /// a flush.
    pub async fn append(&mut self, row: Row) -> Result<Option<u64>, OlapError> {
        if row.len() != self.schema.fields().len() {
            return Err(OlapError::Unsupported(format!(
                "row has {} values but {} has {} columns",
                row.len(),
                self.table,
                self.schema.fields().len()
            )));
        }
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_size {
            return self.flush().await.map(Some);
        }
        Ok(None)
    }

    /// Write buffered rows. Returns the bytes written by this flush.
    pub async fn flush(&mut self) -> Result<u64, OlapError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let rows = std::mem::take(&mut self.buffer);
        let batch = rows_to_batch(&self.schema, &rows)?;
        let bytes = batch.get_array_memory_size() as u64;

        let _catalog = self.engine.read_catalog().await;
        self.engine
            .context()
            .read_batch(batch)?
            .write_table(&self.table.quoted(), DataFrameWriteOptions::new())
            .await?;

        self.engine.add_table_size(&self.table, bytes);
        self.rows_written += rows.len() as u64;
        self.bytes_written += bytes;
        Ok(bytes)
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

fn rows_to_batch(schema: &SchemaRef, rows: &[Row]) -> Result<RecordBatch, OlapError> {
    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let scalars = rows
                .iter()
                .map(|row| scalar_for(&row[i], field.data_type()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ScalarValue::iter_to_array(scalars)?)
        })
        .collect::<Result<Vec<ArrayRef>, OlapError>>()?;
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

/// Scalar with the value's own natural type.
pub(crate) fn natural_scalar(value: &Value) -> ScalarValue {
    match value {
        Value::Null => ScalarValue::Null,
        Value::Bool(b) => ScalarValue::Boolean(Some(*b)),
        Value::Int(i) => ScalarValue::Int64(Some(*i)),
        Value::UInt(u) => ScalarValue::UInt64(Some(*u)),
        Value::Float(f) => ScalarValue::Float64(Some(*f)),
        Value::Str(s) | Value::Decimal(s) => ScalarValue::Utf8(Some(s.clone())),
        Value::Bytes(b) => ScalarValue::Binary(Some(b.clone())),
        Value::Fixed16(b) => ScalarValue::FixedSizeBinary(16, Some(b.to_vec())),
        Value::Date(d) => ScalarValue::Date32(Some(
            d.signed_duration_since(NaiveDate::default())
                .num_days() as i32,
        )),
        Value::Timestamp(ts) => ScalarValue::TimestampMicrosecond(Some(ts.timestamp_micros()), None),
        Value::Time(t) => ScalarValue::Time64Nanosecond(Some(
            t.num_seconds_from_midnight() as i64 * 1_000_000_000 + t.nanosecond() as i64,
        )),
        Value::List(items) => {
            let scalars: Vec<ScalarValue> = items.iter().map(natural_scalar).collect();
            let elem_type = scalars
                .iter()
                .map(|s| s.data_type())
                .find(|t| *t != DataType::Null)
                .unwrap_or(DataType::Null);
            let scalars: Vec<ScalarValue> = scalars
                .into_iter()
                .map(|s| match s {
                    ScalarValue::Null => ScalarValue::try_from(&elem_type).unwrap_or(ScalarValue::Null),
                    other => other,
                })
                .collect();
            ScalarValue::List(ScalarValue::new_list_nullable(&scalars, &elem_type))
        }
    }
}

/// Scalar for `value`, cast to the column type `target`.
pub(crate) fn scalar_for(value: &Value, target: &DataType) -> Result<ScalarValue, OlapError> {
    let scalar = match (value, target) {
        (Value::Null, _) => return Ok(ScalarValue::try_from(target)?),
        (Value::Fixed16(b), DataType::Utf8) => {
            ScalarValue::Utf8(Some(uuid::Uuid::from_bytes(*b).hyphenated().to_string()))
        }
        (Value::List(items), DataType::List(field)) => {
            let scalars = items
                .iter()
                .map(|v| scalar_for(v, field.data_type()))
                .collect::<Result<Vec<_>, _>>()?;
            ScalarValue::List(ScalarValue::new_list_nullable(&scalars, field.data_type()))
        }
        _ => natural_scalar(value),
    };
    if scalar.data_type() == *target {
        Ok(scalar)
    } else {
        Ok(scalar.cast_to(target)?)
    }
}
