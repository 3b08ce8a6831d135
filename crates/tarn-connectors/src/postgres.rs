//! PostgreSQL source: streams the rows of a `sql` property through a row
//! iterator.
//!
//! The query runs on a background task that forwards decoded rows over a
//! bounded channel, so a slow consumer applies backpressure to the server
//! cursor. The schema is taken from the first row's column metadata.

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo};
use tarn_core::iterator::{IteratorError, ProgressUnit, RowIterator};
use tarn_core::source::prop_str;
use tarn_core::{
    Capabilities, Capability, Dialect, Field, Row, SourceHandle, SourceRequest, StructType, Type,
    TypeCode, Value,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ConnectorError;

const CHANNEL_CAPACITY: usize = 1024;

pub struct PostgresHandle {
    pool: PgPool,
}

impl PostgresHandle {
    /// Create a handle without connecting; the first query opens the
    /// connection.
    pub fn connect_lazy(dsn: &str) -> Result<Self, ConnectorError> {
        let pool = PgPoolOptions::new().max_connections(4).connect_lazy(dsn)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SourceHandle for PostgresHandle {
    fn driver(&self) -> &str {
        "postgres"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new([Capability::RowIterator])
    }

    async fn query(&self, req: &SourceRequest) -> anyhow::Result<Box<dyn RowIterator>> {
        let sql = prop_str(&req.properties, "sql")
            .ok_or_else(|| ConnectorError::ConfigError("property \"sql\" is mandatory".to_string()))?
            .to_string();
        Ok(Box::new(PgRowIterator::spawn(self.pool.clone(), sql)))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Iterator
// ---------------------------------------------------------------------------

enum Message {
    Schema(StructType),
    Row(Row),
    Failed(anyhow::Error),
}

pub struct PgRowIterator {
    rx: mpsc::Receiver<Message>,
    task: Option<JoinHandle<()>>,
    schema: Option<StructType>,
    pending: Option<Message>,
}

impl PgRowIterator {
    fn spawn(pool: PgPool, sql: String) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            if let Err(e) = stream_rows(&pool, &sql, &tx).await {
                let _ = tx.send(Message::Failed(e)).await;
            }
        });
        Self {
            rx,
            task: Some(task),
            schema: None,
            pending: None,
        }
    }

    async fn receive(&mut self) -> Option<Message> {
        match self.pending.take() {
            Some(msg) => Some(msg),
            None => self.rx.recv().await,
        }
    }
}

async fn stream_rows(pool: &PgPool, sql: &str, tx: &mpsc::Sender<Message>) -> anyhow::Result<()> {
    let mut rows = sqlx::query(sql).fetch(pool);
    let mut columns: Option<Vec<Type>> = None;
    while let Some(row) = rows.try_next().await? {
        if columns.is_none() {
            let schema = schema_of(&row)?;
            columns = Some(schema.fields.iter().map(|f| f.ty.clone()).collect());
            if tx.send(Message::Schema(schema)).await.is_err() {
                return Ok(());
            }
        }
        let values = decode_row(&row, columns.as_deref().unwrap_or_default())?;
        if tx.send(Message::Row(values)).await.is_err() {
            debug!("Row consumer went away, stopping query");
            return Ok(());
        }
    }
    Ok(())
}

fn schema_of(row: &PgRow) -> anyhow::Result<StructType> {
    let fields = row
        .columns()
        .iter()
        .map(|col| {
            let ty = Dialect::Postgres.to_canonical(col.type_info().name())?;
            Ok(Field::new(col.name(), ty))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(StructType::new(fields))
}

fn decode_row(row: &PgRow, types: &[Type]) -> anyhow::Result<Row> {
    types
        .iter()
        .enumerate()
        .map(|(i, ty)| decode_value(row, i, ty))
        .collect()
}

fn opt<T>(value: Option<T>, f: impl FnOnce(T) -> Value) -> Value {
    value.map(f).unwrap_or(Value::Null)
}

fn decode_value(row: &PgRow, i: usize, ty: &Type) -> anyhow::Result<Value> {
    let type_name = row.columns()[i].type_info().name().to_ascii_uppercase();
    let value = match ty.code {
        TypeCode::Bool => opt(row.try_get::<Option<bool>, _>(i)?, Value::Bool),
        TypeCode::Int16 => opt(row.try_get::<Option<i16>, _>(i)?, |v| Value::Int(v.into())),
        TypeCode::Int32 => opt(row.try_get::<Option<i32>, _>(i)?, |v| Value::Int(v.into())),
        TypeCode::Int64 => opt(row.try_get::<Option<i64>, _>(i)?, Value::Int),
        TypeCode::Float32 => opt(row.try_get::<Option<f32>, _>(i)?, |v| Value::Float(v.into())),
        TypeCode::Float64 => opt(row.try_get::<Option<f64>, _>(i)?, Value::Float),
        TypeCode::String => opt(row.try_get::<Option<String>, _>(i)?, Value::Str),
        TypeCode::Bytes => opt(row.try_get::<Option<Vec<u8>>, _>(i)?, Value::Bytes),
        TypeCode::Date => opt(row.try_get::<Option<chrono::NaiveDate>, _>(i)?, Value::Date),
        TypeCode::Time => opt(row.try_get::<Option<chrono::NaiveTime>, _>(i)?, Value::Time),
        TypeCode::Timestamp if type_name == "TIMESTAMP" => opt(
            row.try_get::<Option<chrono::NaiveDateTime>, _>(i)?,
            |v| Value::Timestamp(v.and_utc()),
        ),
        TypeCode::Timestamp => opt(
            row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?,
            Value::Timestamp,
        ),
        TypeCode::Json => opt(row.try_get::<Option<serde_json::Value>, _>(i)?, |v| {
            Value::Str(v.to_string())
        }),
        TypeCode::Uuid => opt(row.try_get::<Option<uuid::Uuid>, _>(i)?, |v| {
            Value::Fixed16(v.into_bytes())
        }),
        TypeCode::Array => decode_array(row, i, ty)?,
        _ => {
            return Err(ConnectorError::QueryFailed(format!(
                "column {} has type {} which cannot be read, cast it to text or float8",
                row.columns()[i].name(),
                type_name
            ))
            .into())
        }
    };
    Ok(value)
}

fn list<T>(items: Option<Vec<Option<T>>>, f: impl Fn(T) -> Value) -> Value {
    opt(items, |items| {
        Value::List(items.into_iter().map(|v| opt(v, &f)).collect())
    })
}

fn decode_array(row: &PgRow, i: usize, ty: &Type) -> anyhow::Result<Value> {
    let elem = ty.array_element_type.as_deref().map(|t| t.code);
    let value = match elem {
        Some(TypeCode::Bool) => list(row.try_get::<Option<Vec<Option<bool>>>, _>(i)?, Value::Bool),
        Some(TypeCode::Int16) => list(row.try_get::<Option<Vec<Option<i16>>>, _>(i)?, |v| {
            Value::Int(v.into())
        }),
        Some(TypeCode::Int32) => list(row.try_get::<Option<Vec<Option<i32>>>, _>(i)?, |v| {
            Value::Int(v.into())
        }),
        Some(TypeCode::Int64) => list(row.try_get::<Option<Vec<Option<i64>>>, _>(i)?, Value::Int),
        Some(TypeCode::Float64) => {
            list(row.try_get::<Option<Vec<Option<f64>>>, _>(i)?, Value::Float)
        }
        Some(TypeCode::String) => {
            list(row.try_get::<Option<Vec<Option<String>>>, _>(i)?, Value::Str)
        }
        _ => {
            return Err(ConnectorError::QueryFailed(format!(
                "array column {} has an unsupported element type, cast it to text[]",
                row.columns()[i].name()
            ))
            .into())
        }
    };
    Ok(value)
}

#[async_trait]
impl RowIterator for PgRowIterator {
    async fn schema(&mut self) -> Result<StructType, IteratorError> {
        if let Some(schema) = &self.schema {
            return Ok(schema.clone());
        }
        match self.receive().await {
            Some(Message::Schema(schema)) => {
                self.schema = Some(schema.clone());
                Ok(schema)
            }
            Some(Message::Failed(e)) => Err(IteratorError::Source(e)),
            Some(msg @ Message::Row(_)) => {
                self.pending = Some(msg);
                Err(IteratorError::Source(anyhow::anyhow!("row received before schema")))
            }
            None => Err(IteratorError::Done),
        }
    }

    async fn next(&mut self) -> Result<Row, IteratorError> {
        if self.schema.is_none() {
            self.schema().await?;
        }
        match self.receive().await {
            Some(Message::Row(row)) => Ok(row),
            Some(Message::Failed(e)) => Err(IteratorError::Source(e)),
            Some(Message::Schema(_)) => Err(IteratorError::Source(anyhow::anyhow!(
                "unexpected schema message"
            ))),
            None => Err(IteratorError::Done),
        }
    }

    fn size(&self, _unit: ProgressUnit) -> Option<u64> {
        None
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Postgres reader task failed: {}", e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_keeps_null_elements() {
        let v = list(Some(vec![Some(1i64), None, Some(3)]), Value::Int);
        assert_eq!(
            v,
            Value::List(vec![Value::Int(1), Value::Null, Value::Int(3)])
        );
        assert_eq!(list::<i64>(None, Value::Int), Value::Null);
    }

    #[tokio::test]
    async fn missing_sql_is_rejected() {
        let handle = PostgresHandle::connect_lazy("postgres://localhost/none").unwrap();
        let err = handle.query(&SourceRequest::default()).await.err().unwrap();
        assert!(err.to_string().contains("sql"));
    }

    #[tokio::test]
    async fn closed_iterator_reports_done() {
        let (tx, rx) = mpsc::channel(4);
        let mut it = PgRowIterator {
            rx,
            task: None,
            schema: None,
            pending: None,
        };
        let schema = StructType::new(vec![Field::new("a", Type::new(TypeCode::Int64))]);
        tx.send(Message::Schema(schema.clone())).await.unwrap();
        tx.send(Message::Row(vec![Value::Int(7)])).await.unwrap();
        drop(tx);

        assert_eq!(it.schema().await.unwrap(), schema);
        assert_eq!(it.next().await.unwrap(), vec![Value::Int(7)]);
        assert!(it.next().await.unwrap_err().is_done());
        it.close().await.unwrap();
        it.close().await.unwrap();
    }
}
