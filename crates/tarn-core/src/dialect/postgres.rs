//! PostgreSQL type names, used when inferring schemas of rows read through
//! the PostgreSQL connector.

use super::{parse_decimal_args, split_base_and_args, Dialect, DialectError};
use crate::types::{Type, TypeCode};

const D: Dialect = Dialect::Postgres;

pub fn to_ddl(ty: &Type) -> Result<String, DialectError> {
    let s = match ty.code {
        TypeCode::Bool => "BOOLEAN".to_string(),
        TypeCode::Int16 => "SMALLINT".to_string(),
        TypeCode::Int32 => "INTEGER".to_string(),
        TypeCode::Int64 => "BIGINT".to_string(),
        TypeCode::Float32 => "REAL".to_string(),
        TypeCode::Float64 => "DOUBLE PRECISION".to_string(),
        TypeCode::Timestamp => "TIMESTAMPTZ".to_string(),
        TypeCode::Date => "DATE".to_string(),
        TypeCode::Time => "TIME".to_string(),
        TypeCode::String => "TEXT".to_string(),
        TypeCode::Bytes => "BYTEA".to_string(),
        TypeCode::Json => "JSONB".to_string(),
        TypeCode::Uuid => "UUID".to_string(),
        TypeCode::Decimal => {
            let d = ty.decimal.unwrap_or_default();
            format!("NUMERIC({},{})", d.precision, d.scale)
        }
        TypeCode::Array => {
            let elem = ty
                .array_element_type
                .as_deref()
                .ok_or_else(|| DialectError::unsupported(D, ty))?;
            format!("{}[]", to_ddl(elem)?)
        }
        _ => return Err(DialectError::unsupported(D, ty)),
    };
    Ok(s)
}

/// Parse a type name as reported by the server (`INT4`, `_TEXT`, `TEXT[]`,
/// `NUMERIC(10,2)`, `TIMESTAMPTZ` and so on).
pub fn parse(s: &str) -> Result<Type, DialectError> {
    let trimmed = s.trim();
    if let Some(inner) = trimmed.strip_suffix("[]") {
        return Ok(Type::array(parse(inner)?));
    }
    if let Some(inner) = trimmed.strip_prefix('_') {
        return Ok(Type::array(parse(inner)?));
    }

    let upper = trimmed.to_ascii_uppercase();
    let code = match upper.as_str() {
        "BOOL" | "BOOLEAN" => TypeCode::Bool,
        "INT2" | "SMALLINT" => TypeCode::Int16,
        "INT4" | "INT" | "INTEGER" | "SERIAL" => TypeCode::Int32,
        "INT8" | "BIGINT" | "BIGSERIAL" | "OID" => TypeCode::Int64,
        "FLOAT4" | "REAL" => TypeCode::Float32,
        "FLOAT8" | "DOUBLE PRECISION" => TypeCode::Float64,
        "NUMERIC" | "DECIMAL" | "MONEY" => return Ok(Type::decimal(38, 10)),
        "TEXT" | "VARCHAR" | "CHARACTER VARYING" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => {
            TypeCode::String
        }
        "BYTEA" => TypeCode::Bytes,
        "DATE" => TypeCode::Date,
        "TIME" | "TIMETZ" => TypeCode::Time,
        "TIMESTAMP" | "TIMESTAMPTZ" => TypeCode::Timestamp,
        "JSON" | "JSONB" => TypeCode::Json,
        "UUID" => TypeCode::Uuid,
        _ => {
            let (base, args) =
                split_base_and_args(trimmed).ok_or_else(|| DialectError::unparseable(D, s))?;
            return match base.to_ascii_uppercase().as_str() {
                "NUMERIC" | "DECIMAL" => {
                    let (p, sc) =
                        parse_decimal_args(args).ok_or_else(|| DialectError::unparseable(D, s))?;
                    Ok(Type::decimal(p, sc))
                }
                "VARCHAR" | "CHARACTER VARYING" | "CHAR" | "BPCHAR" => {
                    Ok(Type::new(TypeCode::String))
                }
                _ => Err(DialectError::unparseable(D, s)),
            };
        }
    };
    Ok(Type::new(code))
}
