//! DataFusion SQL type names and their Arrow counterparts.
//!
//! DataFusion has no UUID or JSON type; both are stored as `VARCHAR`.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field as ArrowField, Fields, Schema, TimeUnit};

use super::{parse_decimal_args, split_base_and_args, Dialect, DialectError};
use crate::types::{Field, StructType, Type, TypeCode};

const D: Dialect = Dialect::DataFusion;

pub fn to_ddl(ty: &Type) -> Result<String, DialectError> {
    let s = match ty.code {
        TypeCode::Bool => "BOOLEAN".to_string(),
        TypeCode::Int8 => "TINYINT".to_string(),
        TypeCode::Int16 => "SMALLINT".to_string(),
        TypeCode::Int32 => "INT".to_string(),
        TypeCode::Int64 => "BIGINT".to_string(),
        TypeCode::UInt8 => "TINYINT UNSIGNED".to_string(),
        TypeCode::UInt16 => "SMALLINT UNSIGNED".to_string(),
        TypeCode::UInt32 => "INT UNSIGNED".to_string(),
        TypeCode::UInt64 => "BIGINT UNSIGNED".to_string(),
        TypeCode::Float32 => "REAL".to_string(),
        TypeCode::Float64 => "DOUBLE".to_string(),
        TypeCode::Timestamp => "TIMESTAMP".to_string(),
        TypeCode::Date => "DATE".to_string(),
        TypeCode::Time => "TIME".to_string(),
        TypeCode::String | TypeCode::Json | TypeCode::Uuid => "VARCHAR".to_string(),
        TypeCode::Bytes => "BYTEA".to_string(),
        TypeCode::Decimal => {
            let d = ty.decimal.unwrap_or_default();
            format!("DECIMAL({},{})", d.precision, d.scale)
        }
        TypeCode::Array => {
            let elem = ty
                .array_element_type
                .as_deref()
                .ok_or_else(|| DialectError::unsupported(D, ty))?;
            if elem.code == TypeCode::Array {
                return Err(DialectError::unsupported(D, ty));
            }
            format!("{}[]", to_ddl(elem)?)
        }
        TypeCode::Int128
        | TypeCode::Int256
        | TypeCode::UInt128
        | TypeCode::UInt256
        | TypeCode::Struct
        | TypeCode::Map
        | TypeCode::Unspecified => return Err(DialectError::unsupported(D, ty)),
    };
    Ok(s)
}

pub fn parse_ddl(s: &str) -> Result<Type, DialectError> {
    let trimmed = s.trim();
    if let Some(inner) = trimmed.strip_suffix("[]") {
        return Ok(Type::array(parse_ddl(inner)?));
    }
    let upper = trimmed.to_ascii_uppercase();
    let code = match upper.as_str() {
        "BOOLEAN" | "BOOL" => TypeCode::Bool,
        "TINYINT" => TypeCode::Int8,
        "SMALLINT" => TypeCode::Int16,
        "INT" | "INTEGER" => TypeCode::Int32,
        "BIGINT" => TypeCode::Int64,
        "TINYINT UNSIGNED" => TypeCode::UInt8,
        "SMALLINT UNSIGNED" => TypeCode::UInt16,
        "INT UNSIGNED" | "INTEGER UNSIGNED" => TypeCode::UInt32,
        "BIGINT UNSIGNED" => TypeCode::UInt64,
        "REAL" | "FLOAT" => TypeCode::Float32,
        "DOUBLE" | "DOUBLE PRECISION" => TypeCode::Float64,
        "TIMESTAMP" => TypeCode::Timestamp,
        "DATE" => TypeCode::Date,
        "TIME" => TypeCode::Time,
        "VARCHAR" | "TEXT" | "STRING" | "CHAR" => TypeCode::String,
        "BYTEA" | "BLOB" | "BINARY" | "VARBINARY" => TypeCode::Bytes,
        "DECIMAL" | "NUMERIC" => return Ok(Type::decimal(38, 10)),
        _ => {
            let (base, args) =
                split_base_and_args(trimmed).ok_or_else(|| DialectError::unparseable(D, s))?;
            return match base.to_ascii_uppercase().as_str() {
                "DECIMAL" | "NUMERIC" => {
                    let (p, sc) =
                        parse_decimal_args(args).ok_or_else(|| DialectError::unparseable(D, s))?;
                    Ok(Type::decimal(p, sc))
                }
                "VARCHAR" | "CHAR" => Ok(Type::new(TypeCode::String)),
                _ => Err(DialectError::unparseable(D, s)),
            };
        }
    };
    Ok(Type::new(code))
}

// ---------------------------------------------------------------------------
// Arrow
// ---------------------------------------------------------------------------

/// Arrow type used when materialising a canonical type in the engine.
pub fn to_arrow(ty: &Type) -> Result<DataType, DialectError> {
    let dt = match ty.code {
        TypeCode::Bool => DataType::Boolean,
        TypeCode::Int8 => DataType::Int8,
        TypeCode::Int16 => DataType::Int16,
        TypeCode::Int32 => DataType::Int32,
        TypeCode::Int64 => DataType::Int64,
        TypeCode::UInt8 => DataType::UInt8,
        TypeCode::UInt16 => DataType::UInt16,
        TypeCode::UInt32 => DataType::UInt32,
        TypeCode::UInt64 => DataType::UInt64,
        TypeCode::Float32 => DataType::Float32,
        TypeCode::Float64 => DataType::Float64,
        TypeCode::Timestamp => DataType::Timestamp(TimeUnit::Nanosecond, None),
        TypeCode::Date => DataType::Date32,
        TypeCode::Time => DataType::Time64(TimeUnit::Nanosecond),
        TypeCode::String | TypeCode::Json | TypeCode::Uuid => DataType::Utf8,
        TypeCode::Bytes => DataType::Binary,
        TypeCode::Decimal => {
            let d = ty.decimal.unwrap_or_default();
            if d.precision <= 38 {
                DataType::Decimal128(d.precision, d.scale)
            } else {
                DataType::Decimal256(d.precision, d.scale)
            }
        }
        TypeCode::Array => {
            let elem = ty
                .array_element_type
                .as_deref()
                .ok_or_else(|| DialectError::unsupported(D, ty))?;
            DataType::List(Arc::new(ArrowField::new("item", to_arrow(elem)?, true)))
        }
        TypeCode::Struct => {
            let st = ty
                .struct_type
                .as_ref()
                .ok_or_else(|| DialectError::unsupported(D, ty))?;
            DataType::Struct(Fields::from(
                st.fields
                    .iter()
                    .map(|f| Ok(ArrowField::new(&f.name, to_arrow(&f.ty)?, f.ty.nullable)))
                    .collect::<Result<Vec<_>, DialectError>>()?,
            ))
        }
        TypeCode::Int128
        | TypeCode::Int256
        | TypeCode::UInt128
        | TypeCode::UInt256
        | TypeCode::Map
        | TypeCode::Unspecified => return Err(DialectError::unsupported(D, ty)),
    };
    Ok(dt)
}

/// Canonical type of an Arrow column reported by the engine.
pub fn from_arrow(dt: &DataType, nullable: bool) -> Result<Type, DialectError> {
    let ty = match dt {
        DataType::Boolean => Type::new(TypeCode::Bool),
        DataType::Int8 => Type::new(TypeCode::Int8),
        DataType::Int16 => Type::new(TypeCode::Int16),
        DataType::Int32 => Type::new(TypeCode::Int32),
        DataType::Int64 => Type::new(TypeCode::Int64),
        DataType::UInt8 => Type::new(TypeCode::UInt8),
        DataType::UInt16 => Type::new(TypeCode::UInt16),
        DataType::UInt32 => Type::new(TypeCode::UInt32),
        DataType::UInt64 => Type::new(TypeCode::UInt64),
        DataType::Float16 | DataType::Float32 => Type::new(TypeCode::Float32),
        DataType::Float64 => Type::new(TypeCode::Float64),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View | DataType::Null => {
            Type::new(TypeCode::String)
        }
        DataType::Binary
        | DataType::LargeBinary
        | DataType::BinaryView
        | DataType::FixedSizeBinary(_) => Type::new(TypeCode::Bytes),
        DataType::Date32 | DataType::Date64 => Type::new(TypeCode::Date),
        DataType::Time32(_) | DataType::Time64(_) => Type::new(TypeCode::Time),
        DataType::Timestamp(_, _) => Type::new(TypeCode::Timestamp),
        DataType::Decimal128(p, s) | DataType::Decimal256(p, s) => Type::decimal(*p, *s),
        DataType::List(f) | DataType::LargeList(f) | DataType::FixedSizeList(f, _) => {
            Type::array(from_arrow(f.data_type(), f.is_nullable())?)
        }
        DataType::Struct(fields) => Type::structure(
            fields
                .iter()
                .map(|f| Ok(Field::new(f.name(), from_arrow(f.data_type(), f.is_nullable())?)))
                .collect::<Result<Vec<_>, DialectError>>()?,
        ),
        DataType::Map(entries, _) => match entries.data_type() {
            DataType::Struct(kv) if kv.len() == 2 => Type::map(
                from_arrow(kv[0].data_type(), kv[0].is_nullable())?,
                from_arrow(kv[1].data_type(), kv[1].is_nullable())?,
            ),
            other => {
                return Err(DialectError::Unsupported {
                    dialect: D,
                    type_name: other.to_string(),
                })
            }
        },
        DataType::Dictionary(_, value) => from_arrow(value, nullable)?,
        other => {
            return Err(DialectError::Unsupported {
                dialect: D,
                type_name: other.to_string(),
            })
        }
    };
    Ok(ty.with_nullable(nullable))
}

pub fn schema_from_arrow(schema: &Schema) -> Result<StructType, DialectError> {
    Ok(StructType::new(
        schema
            .fields()
            .iter()
            .map(|f| Ok(Field::new(f.name(), from_arrow(f.data_type(), f.is_nullable())?)))
            .collect::<Result<Vec<_>, DialectError>>()?,
    ))
}
