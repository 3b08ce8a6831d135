//! ClickHouse type names.
//!
//! `Nullable(X)` and `LowCardinality(X)` wrappers are peeled recursively
//! before the base type is matched.

use super::{parse_decimal_args, split_base_and_args, split_top_level, Dialect, DialectError};
use crate::types::{Type, TypeCode};

const D: Dialect = Dialect::ClickHouse;

pub fn to_ddl(ty: &Type) -> Result<String, DialectError> {
    let base = match ty.code {
        TypeCode::Bool => "Bool".to_string(),
        TypeCode::Int8 => "Int8".to_string(),
        TypeCode::Int16 => "Int16".to_string(),
        TypeCode::Int32 => "Int32".to_string(),
        TypeCode::Int64 => "Int64".to_string(),
        TypeCode::Int128 => "Int128".to_string(),
        TypeCode::Int256 => "Int256".to_string(),
        TypeCode::UInt8 => "UInt8".to_string(),
        TypeCode::UInt16 => "UInt16".to_string(),
        TypeCode::UInt32 => "UInt32".to_string(),
        TypeCode::UInt64 => "UInt64".to_string(),
        TypeCode::UInt128 => "UInt128".to_string(),
        TypeCode::UInt256 => "UInt256".to_string(),
        TypeCode::Float32 => "Float32".to_string(),
        TypeCode::Float64 => "Float64".to_string(),
        TypeCode::Timestamp => "DateTime64(6)".to_string(),
        TypeCode::Date => "Date".to_string(),
        TypeCode::String | TypeCode::Bytes => "String".to_string(),
        TypeCode::Json => "JSON".to_string(),
        TypeCode::Uuid => "UUID".to_string(),
        TypeCode::Decimal => {
            let d = ty.decimal.unwrap_or_default();
            format!("Decimal({}, {})", d.precision, d.scale)
        }
        TypeCode::Array => {
            let elem = ty
                .array_element_type
                .as_deref()
                .ok_or_else(|| DialectError::unsupported(D, ty))?;
            // Arrays themselves are never Nullable in ClickHouse.
            return Ok(format!("Array({})", to_ddl(elem)?));
        }
        TypeCode::Map => {
            let m = ty
                .map_type
                .as_deref()
                .ok_or_else(|| DialectError::unsupported(D, ty))?;
            return Ok(format!("Map({}, {})", to_ddl(&m.key)?, to_ddl(&m.value)?));
        }
        TypeCode::Time | TypeCode::Struct | TypeCode::Unspecified => {
            return Err(DialectError::unsupported(D, ty))
        }
    };
    if ty.nullable {
        Ok(format!("Nullable({})", base))
    } else {
        Ok(base)
    }
}

pub fn parse(s: &str) -> Result<Type, DialectError> {
    parse_inner(s.trim(), false)
}

fn parse_inner(s: &str, nullable: bool) -> Result<Type, DialectError> {
    let upper = s.to_ascii_uppercase();

    if upper.starts_with("NULLABLE(") && s.ends_with(')') {
        return parse_inner(&s[9..s.len() - 1], true);
    }
    if upper.starts_with("LOWCARDINALITY(") && s.ends_with(')') {
        return parse_inner(&s[15..s.len() - 1], nullable);
    }

    let code = match upper.as_str() {
        "BOOL" | "BOOLEAN" => Some(TypeCode::Bool),
        "INT8" => Some(TypeCode::Int8),
        "INT16" => Some(TypeCode::Int16),
        "INT32" => Some(TypeCode::Int32),
        "INT64" => Some(TypeCode::Int64),
        "INT128" => Some(TypeCode::Int128),
        "INT256" => Some(TypeCode::Int256),
        "UINT8" => Some(TypeCode::UInt8),
        "UINT16" => Some(TypeCode::UInt16),
        "UINT32" => Some(TypeCode::UInt32),
        "UINT64" => Some(TypeCode::UInt64),
        "UINT128" => Some(TypeCode::UInt128),
        "UINT256" => Some(TypeCode::UInt256),
        "FLOAT32" => Some(TypeCode::Float32),
        "FLOAT64" => Some(TypeCode::Float64),
        "DECIMAL" => Some(TypeCode::Float64),
        "STRING" | "IPV4" | "IPV6" => Some(TypeCode::String),
        "DATE" | "DATE32" => Some(TypeCode::Date),
        "DATETIME" | "DATETIME64" => Some(TypeCode::Timestamp),
        "JSON" | "OBJECT('JSON')" | "OTHER" => Some(TypeCode::Json),
        "UUID" => Some(TypeCode::Uuid),
        _ => None,
    };
    if let Some(code) = code {
        return Ok(Type::new(code).with_nullable(nullable));
    }

    let (base, args) = split_base_and_args(s).ok_or_else(|| DialectError::unparseable(D, s))?;
    let ty = match base.to_ascii_uppercase().as_str() {
        "DATETIME" | "DATETIME64" => Type::new(TypeCode::Timestamp),
        "DECIMAL" | "DECIMAL32" | "DECIMAL64" | "DECIMAL128" | "DECIMAL256" => {
            let (p, sc) = match base.to_ascii_uppercase().as_str() {
                "DECIMAL" => parse_decimal_args(args),
                // DecimalN(S) carries only the scale.
                "DECIMAL32" => args.trim().parse().ok().map(|sc| (9, sc)),
                "DECIMAL64" => args.trim().parse().ok().map(|sc| (18, sc)),
                "DECIMAL128" => args.trim().parse().ok().map(|sc| (38, sc)),
                _ => args.trim().parse().ok().map(|sc| (76, sc)),
            }
            .ok_or_else(|| DialectError::unparseable(D, s))?;
            Type::decimal(p, sc)
        }
        "FIXEDSTRING" | "ENUM" | "ENUM8" | "ENUM16" => Type::new(TypeCode::String),
        "ARRAY" => Type::array(parse_inner(args, true)?),
        "MAP" => match split_top_level(args).as_slice() {
            [k, v] => Type::map(parse_inner(k, false)?, parse_inner(v, true)?),
            _ => return Err(DialectError::unparseable(D, s)),
        },
        _ => return Err(DialectError::unparseable(D, s)),
    };
    Ok(ty.with_nullable(nullable))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_nullable_and_low_cardinality() {
        let ty = parse("LowCardinality(Nullable(String))").unwrap();
        assert_eq!(ty.code, TypeCode::String);
        assert!(ty.nullable);

        let ty = parse("Nullable(LowCardinality(String))").unwrap();
        assert_eq!(ty.code, TypeCode::String);
        assert!(ty.nullable);

        let ty = parse("LowCardinality(String)").unwrap();
        assert!(!ty.nullable);
    }

    #[test]
    fn datetime_with_timezone() {
        let ty = parse("DateTime64(3, 'UTC')").unwrap();
        assert_eq!(ty.code, TypeCode::Timestamp);
        let ty = parse("DateTime('Europe/Berlin')").unwrap();
        assert_eq!(ty.code, TypeCode::Timestamp);
    }

    #[test]
    fn enums_become_strings() {
        let ty = parse("Enum8('a' = 1, 'b' = 2)").unwrap();
        assert_eq!(ty.code, TypeCode::String);
    }

    #[test]
    fn scaled_decimals() {
        let ty = parse("Decimal64(4)").unwrap();
        assert_eq!(ty.decimal.map(|d| (d.precision, d.scale)), Some((18, 4)));
    }

    #[test]
    fn nullable_wrapping_on_render() {
        let s = to_ddl(&Type::new(TypeCode::Int64)).unwrap();
        assert_eq!(s, "Nullable(Int64)");
        let s = to_ddl(&Type::new(TypeCode::Int64).with_nullable(false)).unwrap();
        assert_eq!(s, "Int64");
        let s = to_ddl(&Type::array(Type::new(TypeCode::String))).unwrap();
        assert_eq!(s, "Array(Nullable(String))");
    }

    #[test]
    fn map_round_trip() {
        let ty = parse("Map(String, Nullable(Int64))").unwrap();
        let m = ty.map_type.unwrap();
        assert_eq!(m.key.code, TypeCode::String);
        assert_eq!(m.value.code, TypeCode::Int64);
    }

    #[test]
    fn garbage_is_unparseable() {
        let err = parse("Tuple(Int8").unwrap_err();
        assert!(matches!(err, DialectError::Unparseable { .. }));
    }
}
