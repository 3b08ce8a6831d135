//! Rows declared directly in the source definition.
//!
//! ```json
//! {
//!   "columns": [{"name": "id", "type": "BIGINT"}, {"name": "label", "type": "VARCHAR"}],
//!   "rows": [[1, "a"], [2, "b"]]
//! }
//! ```
//!
//! Column types use engine type syntax. A definition without rows yields
//! an iterator that reports no data.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::Value as Json;
use tarn_core::iterator::RowIterator;
use tarn_core::{
    Capabilities, Capability, Dialect, Field, Row, SourceHandle, SourceRequest, StructType, Type,
    TypeCode, Value, VecRowIterator,
};

use crate::error::ConnectorError;

pub const DRIVER: &str = "inline";

#[derive(Debug, Deserialize)]
struct ColumnDef {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

pub struct InlineHandle;

#[async_trait]
impl SourceHandle for InlineHandle {
    fn driver(&self) -> &str {
        DRIVER
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new([Capability::RowIterator])
    }

    async fn query(&self, req: &SourceRequest) -> anyhow::Result<Box<dyn RowIterator>> {
        let (schema, rows) = parse_inline(req)?;
        let schema = (!rows.is_empty()).then_some(schema);
        Ok(Box::new(VecRowIterator::new(schema, rows)))
    }
}

fn parse_inline(req: &SourceRequest) -> Result<(StructType, Vec<Row>), ConnectorError> {
    let columns: Vec<ColumnDef> = req
        .properties
        .get("columns")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ConnectorError::ConfigError(format!("invalid \"columns\": {}", e)))?
        .ok_or_else(|| ConnectorError::ConfigError("property \"columns\" is mandatory".to_string()))?;

    let fields = columns
        .into_iter()
        .map(|c| {
            let ty = Dialect::DataFusion
                .to_canonical(&c.ty)
                .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;
            Ok(Field::new(c.name, ty))
        })
        .collect::<Result<Vec<_>, ConnectorError>>()?;
    let schema = StructType::new(fields);

    let raw = match req.properties.get("rows") {
        None | Some(Json::Null) => vec![],
        Some(Json::Array(rows)) => rows.clone(),
        Some(_) => return Err(ConnectorError::ConfigError("\"rows\" must be an array".to_string())),
    };

    let rows = raw
        .iter()
        .enumerate()
        .map(|(n, row)| {
            let cells = row
                .as_array()
                .filter(|cells| cells.len() == schema.len())
                .ok_or_else(|| {
                    ConnectorError::ConfigError(format!(
                        "row {} must be an array of {} values",
                        n,
                        schema.len()
                    ))
                })?;
            schema
                .fields
                .iter()
                .zip(cells)
                .map(|(field, cell)| {
                    json_to_value(cell, &field.ty).ok_or_else(|| {
                        ConnectorError::ConfigError(format!(
                            "row {}: {} is not a valid {:?} for column {}",
                            n, cell, field.ty.code, field.name
                        ))
                    })
                })
                .collect::<Result<Row, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((schema, rows))
}

fn json_to_value(v: &Json, ty: &Type) -> Option<Value> {
    if v.is_null() {
        return Some(Value::Null);
    }
    let value = match ty.code {
        TypeCode::Bool => Value::Bool(v.as_bool()?),
        TypeCode::Int8 | TypeCode::Int16 | TypeCode::Int32 | TypeCode::Int64 => Value::Int(v.as_i64()?),
        TypeCode::UInt8 | TypeCode::UInt16 | TypeCode::UInt32 | TypeCode::UInt64 => {
            Value::UInt(v.as_u64()?)
        }
        TypeCode::Float32 | TypeCode::Float64 => Value::Float(v.as_f64()?),
        TypeCode::String => match v {
            Json::String(s) => Value::Str(s.clone()),
            other => Value::Str(other.to_string()),
        },
        TypeCode::Bytes => Value::Bytes(v.as_str()?.as_bytes().to_vec()),
        TypeCode::Decimal => match v {
            Json::Number(n) => Value::Decimal(n.to_string()),
            Json::String(s) => Value::Decimal(s.clone()),
            _ => return None,
        },
        TypeCode::Date => Value::Date(NaiveDate::parse_from_str(v.as_str()?, "%Y-%m-%d").ok()?),
        TypeCode::Time => Value::Time(NaiveTime::parse_from_str(v.as_str()?, "%H:%M:%S%.f").ok()?),
        TypeCode::Timestamp => Value::Timestamp(parse_timestamp(v.as_str()?)?),
        TypeCode::Array => {
            let elem = ty.array_element_type.as_deref()?;
            Value::List(
                v.as_array()?
                    .iter()
                    .map(|item| json_to_value(item, elem))
                    .collect::<Option<Vec<_>>>()?,
            )
        }
        _ => return None,
    };
    Some(value)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|ts| ts.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(props: Json) -> SourceRequest {
        let mut req = SourceRequest::default();
        if let Json::Object(map) = props {
            req.properties.extend(map);
        }
        req
    }

    #[tokio::test]
    async fn yields_typed_rows() {
        let req = request(json!({
            "columns": [
                {"name": "id", "type": "BIGINT"},
                {"name": "day", "type": "DATE"},
                {"name": "at", "type": "TIMESTAMP"},
                {"name": "tags", "type": "VARCHAR[]"}
            ],
            "rows": [
                [1, "2024-03-01", "2024-03-01T10:00:00Z", ["a", "b"]],
                [2, null, "2024-03-02 11:30:00", []]
            ]
        }));
        let mut it = InlineHandle.query(&req).await.unwrap();
        let schema = it.schema().await.unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["id", "day", "at", "tags"]);
        assert_eq!(schema.fields[3].ty.code, TypeCode::Array);

        let first = it.next().await.unwrap();
        assert_eq!(first[0], Value::Int(1));
        assert_eq!(
            first[3],
            Value::List(vec![Value::Str("a".into()), Value::Str("b".into())])
        );
        let second = it.next().await.unwrap();
        assert_eq!(second[1], Value::Null);
        assert!(matches!(second[2], Value::Timestamp(_)));
        assert!(it.next().await.unwrap_err().is_done());
    }

    #[tokio::test]
    async fn no_rows_means_no_schema() {
        let req = request(json!({"columns": [{"name": "id", "type": "BIGINT"}]}));
        let mut it = InlineHandle.query(&req).await.unwrap();
        assert!(it.schema().await.unwrap_err().is_done());
    }

    #[tokio::test]
    async fn rejects_malformed_rows() {
        let req = request(json!({
            "columns": [{"name": "id", "type": "BIGINT"}],
            "rows": [["not a number"]]
        }));
        let err = InlineHandle.query(&req).await.err().unwrap();
        assert!(err.to_string().contains("row 0"), "{err}");

        let req = request(json!({
            "columns": [{"name": "id", "type": "BIGINT"}],
            "rows": [[1, 2]]
        }));
        assert!(InlineHandle.query(&req).await.is_err());

        assert!(InlineHandle.query(&SourceRequest::default()).await.is_err());
    }
}
