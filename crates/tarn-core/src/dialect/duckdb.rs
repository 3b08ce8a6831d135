//! DuckDB type names.

use super::{parse_decimal_args, split_base_and_args, split_top_level, Dialect, DialectError};
use crate::types::{Field, Type, TypeCode};

const D: Dialect = Dialect::DuckDb;

pub fn to_ddl(ty: &Type) -> Result<String, DialectError> {
    let s = match ty.code {
        TypeCode::Bool => "BOOLEAN".to_string(),
        TypeCode::Int8 => "TINYINT".to_string(),
        TypeCode::Int16 => "SMALLINT".to_string(),
        TypeCode::Int32 => "INTEGER".to_string(),
        TypeCode::Int64 => "BIGINT".to_string(),
        TypeCode::Int128 => "HUGEINT".to_string(),
        TypeCode::UInt8 => "UTINYINT".to_string(),
        TypeCode::UInt16 => "USMALLINT".to_string(),
        TypeCode::UInt32 => "UINTEGER".to_string(),
        TypeCode::UInt64 => "UBIGINT".to_string(),
        TypeCode::UInt128 => "UHUGEINT".to_string(),
        TypeCode::Float32 => "FLOAT".to_string(),
        TypeCode::Float64 => "DOUBLE".to_string(),
        TypeCode::Timestamp => "TIMESTAMP".to_string(),
        TypeCode::Date => "DATE".to_string(),
        TypeCode::Time => "TIME".to_string(),
        TypeCode::String => "VARCHAR".to_string(),
        TypeCode::Bytes => "BLOB".to_string(),
        TypeCode::Json => "JSON".to_string(),
        TypeCode::Uuid => "UUID".to_string(),
        TypeCode::Decimal => {
            let d = ty.decimal.unwrap_or_default();
            format!("DECIMAL({},{})", d.precision, d.scale)
        }
        TypeCode::Array => {
            let elem = ty
                .array_element_type
                .as_deref()
                .ok_or_else(|| DialectError::unsupported(D, ty))?;
            format!("{}[]", to_ddl(elem)?)
        }
        TypeCode::Map => {
            let m = ty
                .map_type
                .as_deref()
                .ok_or_else(|| DialectError::unsupported(D, ty))?;
            format!("MAP({}, {})", to_ddl(&m.key)?, to_ddl(&m.value)?)
        }
        TypeCode::Struct => {
            let st = ty
                .struct_type
                .as_ref()
                .ok_or_else(|| DialectError::unsupported(D, ty))?;
            let fields = st
                .fields
                .iter()
                .map(|f| Ok(format!("{} {}", super::quote_identifier(&f.name), to_ddl(&f.ty)?)))
                .collect::<Result<Vec<_>, DialectError>>()?;
            format!("STRUCT({})", fields.join(", "))
        }
        TypeCode::Int256 | TypeCode::UInt256 | TypeCode::Unspecified => {
            return Err(DialectError::unsupported(D, ty))
        }
    };
    Ok(s)
}

pub fn parse(s: &str) -> Result<Type, DialectError> {
    let trimmed = s.trim();
    if let Some(inner) = trimmed.strip_suffix("[]") {
        return Ok(Type::array(parse(inner)?));
    }

    let upper = trimmed.to_ascii_uppercase();
    let code = match upper.as_str() {
        "BOOLEAN" | "BOOL" | "LOGICAL" => Some(TypeCode::Bool),
        "TINYINT" | "INT1" => Some(TypeCode::Int8),
        "SMALLINT" | "INT2" | "SHORT" => Some(TypeCode::Int16),
        "INTEGER" | "INT" | "INT4" | "SIGNED" => Some(TypeCode::Int32),
        "BIGINT" | "INT8" | "LONG" => Some(TypeCode::Int64),
        "HUGEINT" => Some(TypeCode::Int128),
        "UTINYINT" => Some(TypeCode::UInt8),
        "USMALLINT" => Some(TypeCode::UInt16),
        "UINTEGER" => Some(TypeCode::UInt32),
        "UBIGINT" => Some(TypeCode::UInt64),
        "UHUGEINT" => Some(TypeCode::UInt128),
        "FLOAT" | "FLOAT4" | "REAL" => Some(TypeCode::Float32),
        "DOUBLE" | "FLOAT8" => Some(TypeCode::Float64),
        "TIMESTAMP" | "DATETIME" | "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" | "TIMESTAMP_S"
        | "TIMESTAMP_MS" | "TIMESTAMP_NS" => Some(TypeCode::Timestamp),
        "DATE" => Some(TypeCode::Date),
        "TIME" => Some(TypeCode::Time),
        "VARCHAR" | "TEXT" | "STRING" | "CHAR" | "BPCHAR" => Some(TypeCode::String),
        "BLOB" | "BYTEA" | "BINARY" | "VARBINARY" => Some(TypeCode::Bytes),
        "JSON" => Some(TypeCode::Json),
        "UUID" => Some(TypeCode::Uuid),
        "DECIMAL" | "NUMERIC" => return Ok(Type::decimal(18, 3)),
        _ => None,
    };
    if let Some(code) = code {
        return Ok(Type::new(code));
    }

    let (base, args) = split_base_and_args(trimmed).ok_or_else(|| DialectError::unparseable(D, s))?;
    match base.to_ascii_uppercase().as_str() {
        "DECIMAL" | "NUMERIC" => {
            let (p, sc) = parse_decimal_args(args).ok_or_else(|| DialectError::unparseable(D, s))?;
            Ok(Type::decimal(p, sc))
        }
        "VARCHAR" => Ok(Type::new(TypeCode::String)),
        "MAP" => match split_top_level(args).as_slice() {
            [k, v] => Ok(Type::map(parse(k)?, parse(v)?)),
            _ => Err(DialectError::unparseable(D, s)),
        },
        "STRUCT" => {
            let fields = split_top_level(args)
                .into_iter()
                .map(|part| parse_struct_field(part).ok_or_else(|| DialectError::unparseable(D, s)))
                .collect::<Result<Vec<_>, _>>()?;
            let fields = fields
                .into_iter()
                .map(|(name, ty)| Ok(Field::new(name, parse(ty)?)))
                .collect::<Result<Vec<_>, DialectError>>()?;
            Ok(Type::structure(fields))
        }
        _ => Err(DialectError::unparseable(D, s)),
    }
}

/// Split `"name" TYPE` or `name TYPE` into its parts.
fn parse_struct_field(part: &str) -> Option<(String, &str)> {
    let part = part.trim();
    if let Some(rest) = part.strip_prefix('"') {
        let mut name = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((i, ch)) = chars.next() {
            if ch == '"' {
                if matches!(chars.peek(), Some((_, '"'))) {
                    name.push('"');
                    chars.next();
                    continue;
                }
                return Some((name, rest[i + 1..].trim()));
            }
            name.push(ch);
        }
        None
    } else {
        let (name, ty) = part.split_once(char::is_whitespace)?;
        Some((name.to_string(), ty.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_fields_keep_quoted_names() {
        let ty = parse(r#"STRUCT("Id" INTEGER, "we""ird" VARCHAR[])"#).unwrap();
        let st = ty.struct_type.unwrap();
        assert_eq!(st.fields[0].name, "Id");
        assert_eq!(st.fields[1].name, "we\"ird");
        assert_eq!(st.fields[1].ty.code, TypeCode::Array);
    }

    #[test]
    fn nested_list_of_maps() {
        let ty = Type::array(Type::map(
            Type::new(TypeCode::String),
            Type::new(TypeCode::Int64),
        ));
        let s = to_ddl(&ty).unwrap();
        assert_eq!(s, "MAP(VARCHAR, BIGINT)[]");
        assert_eq!(parse(&s).unwrap(), ty);
    }

    #[test]
    fn int256_is_rejected() {
        assert!(to_ddl(&Type::new(TypeCode::Int256)).is_err());
    }
}
