//! Dialect translation between the canonical [`Type`] model and engine type
//! strings, plus identifier quoting.
//!
//! Every dialect guarantees `to_canonical(from_canonical(t)).code == t.code`
//! for the codes listed by [`Dialect::lossless_codes`]. Codes a dialect can
//! only store by coercion (for example JSON kept as text) still translate
//! but are not expected to round-trip.

pub mod clickhouse;
pub mod datafusion;
pub mod duckdb;
pub mod postgres;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Type, TypeCode};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DialectError {
    #[error("{dialect} does not support type {type_name}")]
    Unsupported {
        dialect: Dialect,
        type_name: String,
    },
    #[error("{dialect} type string {type_string:?} could not be parsed")]
    Unparseable {
        dialect: Dialect,
        type_string: String,
    },
}

impl DialectError {
    pub(crate) fn unsupported(dialect: Dialect, ty: &Type) -> Self {
        DialectError::Unsupported {
            dialect,
            type_name: format!("{:?}", ty.code),
        }
    }

    pub(crate) fn unparseable(dialect: Dialect, s: &str) -> Self {
        DialectError::Unparseable {
            dialect,
            type_string: s.to_string(),
        }
    }
}

/// Engines whose type syntax this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    DataFusion,
    DuckDb,
    ClickHouse,
    Postgres,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Dialect::DataFusion => "datafusion",
            Dialect::DuckDb => "duckdb",
            Dialect::ClickHouse => "clickhouse",
            Dialect::Postgres => "postgres",
        })
    }
}

impl Dialect {
    /// Render a canonical type as this dialect's DDL type string.
    pub fn from_canonical(self, ty: &Type) -> Result<String, DialectError> {
        match self {
            Dialect::DataFusion => datafusion::to_ddl(ty),
            Dialect::DuckDb => duckdb::to_ddl(ty),
            Dialect::ClickHouse => clickhouse::to_ddl(ty),
            Dialect::Postgres => postgres::to_ddl(ty),
        }
    }

    /// Parse an engine-reported type string into the canonical model.
    pub fn to_canonical(self, type_string: &str) -> Result<Type, DialectError> {
        match self {
            Dialect::DataFusion => datafusion::parse_ddl(type_string),
            Dialect::DuckDb => duckdb::parse(type_string),
            Dialect::ClickHouse => clickhouse::parse(type_string),
            Dialect::Postgres => postgres::parse(type_string),
        }
    }

    /// Codes that survive a canonical -> dialect -> canonical round trip.
    pub fn lossless_codes(self) -> Vec<TypeCode> {
        let unsupported_or_coerced: &[TypeCode] = match self {
            Dialect::DataFusion => &[
                TypeCode::Int128,
                TypeCode::Int256,
                TypeCode::UInt128,
                TypeCode::UInt256,
                TypeCode::Struct,
                TypeCode::Map,
                TypeCode::Json,
                TypeCode::Uuid,
            ],
            Dialect::DuckDb => &[TypeCode::Int256, TypeCode::UInt256],
            Dialect::ClickHouse => &[TypeCode::Time, TypeCode::Bytes, TypeCode::Struct],
            Dialect::Postgres => &[
                TypeCode::Int8,
                TypeCode::Int128,
                TypeCode::Int256,
                TypeCode::UInt8,
                TypeCode::UInt16,
                TypeCode::UInt32,
                TypeCode::UInt64,
                TypeCode::UInt128,
                TypeCode::UInt256,
                TypeCode::Struct,
                TypeCode::Map,
            ],
        };
        TypeCode::ALL
            .iter()
            .copied()
            .filter(|c| !unsupported_or_coerced.contains(c))
            .collect()
    }

    /// Quote an identifier, doubling embedded quote characters.
    pub fn quote_identifier(self, name: &str) -> String {
        quote_identifier(name)
    }
}

/// Double-quote an identifier. An empty name is returned unchanged.
pub fn quote_identifier(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Split `BASE(args)` into `("BASE", "args")`. Returns `None` when the string
/// has no balanced trailing parenthesis.
pub(crate) fn split_base_and_args(s: &str) -> Option<(&str, &str)> {
    let open = s.find('(')?;
    if !s.ends_with(')') {
        return None;
    }
    Some((s[..open].trim(), &s[open + 1..s.len() - 1]))
}

/// Split a comma separated argument list at depth zero, so nested
/// parenthesised types stay intact.
pub(crate) fn split_top_level(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, ch) in args.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(args[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = args[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Parse `p` or `p, s` decimal arguments.
pub(crate) fn parse_decimal_args(args: &str) -> Option<(u8, i8)> {
    let parts = split_top_level(args);
    match parts.as_slice() {
        [p] => Some((p.parse().ok()?, 0)),
        [p, s] => Some((p.parse().ok()?, s.parse().ok()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, Type};

    fn sample(code: TypeCode) -> Type {
        match code {
            TypeCode::Array => Type::array(Type::new(TypeCode::Int32)),
            TypeCode::Map => Type::map(Type::new(TypeCode::String), Type::new(TypeCode::Int64)),
            TypeCode::Struct => Type::structure(vec![
                Field::new("a", Type::new(TypeCode::Int32)),
                Field::new("b", Type::new(TypeCode::String)),
            ]),
            TypeCode::Decimal => Type::decimal(18, 3),
            other => Type::new(other),
        }
    }

    #[test]
    fn round_trip_every_lossless_code() {
        for dialect in [
            Dialect::DataFusion,
            Dialect::DuckDb,
            Dialect::ClickHouse,
            Dialect::Postgres,
        ] {
            for code in dialect.lossless_codes() {
                let ty = sample(code);
                let rendered = dialect
                    .from_canonical(&ty)
                    .unwrap_or_else(|e| panic!("{dialect}: {code:?}: {e}"));
                let parsed = dialect
                    .to_canonical(&rendered)
                    .unwrap_or_else(|e| panic!("{dialect}: {rendered}: {e}"));
                assert_eq!(parsed.code, code, "{dialect} rendered {rendered}");
                if code == TypeCode::Decimal {
                    assert_eq!(parsed.decimal, ty.decimal, "{dialect} {rendered}");
                }
                if code == TypeCode::Array {
                    assert_eq!(
                        parsed.array_element_type.map(|t| t.code),
                        Some(TypeCode::Int32),
                        "{dialect} {rendered}"
                    );
                }
            }
        }
    }

    #[test]
    fn int64_maps_to_bigint_and_back() {
        let s = Dialect::DuckDb
            .from_canonical(&Type::new(TypeCode::Int64))
            .unwrap();
        assert_eq!(s, "BIGINT");
        assert_eq!(Dialect::DuckDb.to_canonical(&s).unwrap().code, TypeCode::Int64);
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_identifier("plain"), "\"plain\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_identifier(""), "");
    }

    #[test]
    fn split_top_level_keeps_nested_args() {
        assert_eq!(
            split_top_level("String, Array(Tuple(Int8, Int16))"),
            vec!["String", "Array(Tuple(Int8, Int16))"]
        );
    }

    #[test]
    fn unsupported_error_names_the_type() {
        let err = Dialect::ClickHouse
            .from_canonical(&sample(TypeCode::Struct))
            .unwrap_err();
        assert!(err.to_string().contains("Struct"), "{err}");
    }
}
