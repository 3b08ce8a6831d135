//! Canonical type model shared by every connector and engine.
//!
//! Dialects translate to and from this model; row values produced by
//! iterators are described by a [`StructType`] built from it.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Engine-independent type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeCode {
    Unspecified,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Int256,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    UInt256,
    Float32,
    Float64,
    Timestamp,
    Date,
    Time,
    String,
    Bytes,
    Array,
    Struct,
    Map,
    Decimal,
    Json,
    Uuid,
}

impl TypeCode {
    /// Every code except `Unspecified`, in declaration order.
    pub const ALL: [TypeCode; 26] = [
        TypeCode::Bool,
        TypeCode::Int8,
        TypeCode::Int16,
        TypeCode::Int32,
        TypeCode::Int64,
        TypeCode::Int128,
        TypeCode::Int256,
        TypeCode::UInt8,
        TypeCode::UInt16,
        TypeCode::UInt32,
        TypeCode::UInt64,
        TypeCode::UInt128,
        TypeCode::UInt256,
        TypeCode::Float32,
        TypeCode::Float64,
        TypeCode::Timestamp,
        TypeCode::Date,
        TypeCode::Time,
        TypeCode::String,
        TypeCode::Bytes,
        TypeCode::Array,
        TypeCode::Struct,
        TypeCode::Map,
        TypeCode::Decimal,
        TypeCode::Json,
        TypeCode::Uuid,
    ];

    /// Scalar codes carry no nested type information.
    pub fn is_scalar(self) -> bool {
        !matches!(
            self,
            TypeCode::Array | TypeCode::Struct | TypeCode::Map | TypeCode::Unspecified
        )
    }
}

/// Precision and scale of a decimal column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecimalParams {
    pub precision: u8,
    pub scale: i8,
}

impl Default for DecimalParams {
    fn default() -> Self {
        Self {
            precision: 38,
            scale: 10,
        }
    }
}

/// A fully described canonical type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Type {
    pub code: TypeCode,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_element_type: Option<Box<Type>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub struct_type: Option<StructType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_type: Option<Box<MapType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal: Option<DecimalParams>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapType {
    pub key: Type,
    pub value: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StructType {
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

impl Type {
    /// A nullable scalar of the given code.
    pub fn new(code: TypeCode) -> Self {
        Self {
            code,
            nullable: true,
            array_element_type: None,
            struct_type: None,
            map_type: None,
            decimal: None,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn array(element: Type) -> Self {
        Self {
            array_element_type: Some(Box::new(element)),
            ..Self::new(TypeCode::Array)
        }
    }

    pub fn map(key: Type, value: Type) -> Self {
        Self {
            map_type: Some(Box::new(MapType { key, value })),
            ..Self::new(TypeCode::Map)
        }
    }

    pub fn structure(fields: Vec<Field>) -> Self {
        Self {
            struct_type: Some(StructType { fields }),
            ..Self::new(TypeCode::Struct)
        }
    }

    pub fn decimal(precision: u8, scale: i8) -> Self {
        Self {
            decimal: Some(DecimalParams { precision, scale }),
            ..Self::new(TypeCode::Decimal)
        }
    }
}

impl Field {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl StructType {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

// ---------------------------------------------------------------------------
// Row values
// ---------------------------------------------------------------------------

/// A single typed value produced by a row iterator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Fixed-width 16 byte value, typically a UUID read from a binary column.
    Fixed16([u8; 16]),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Time(NaiveTime),
    /// Decimal kept in its textual form to avoid precision loss.
    Decimal(String),
    List(Vec<Value>),
}

/// One row, positionally aligned with the iterator's schema.
pub type Row = Vec<Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Rough in-memory footprint used for progress accounting.
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Null => 1,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::UInt(_) | Value::Float(_) => 8,
            Value::Str(s) | Value::Decimal(s) => s.len(),
            Value::Bytes(b) => b.len(),
            Value::Fixed16(_) => 16,
            Value::Date(_) => 4,
            Value::Timestamp(_) | Value::Time(_) => 8,
            Value::List(items) => items.iter().map(Value::approx_size).sum::<usize>() + 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_nested_parts() {
        let arr = Type::array(Type::new(TypeCode::Int64));
        assert_eq!(arr.code, TypeCode::Array);
        assert_eq!(
            arr.array_element_type.as_deref().map(|t| t.code),
            Some(TypeCode::Int64)
        );

        let map = Type::map(Type::new(TypeCode::String), Type::new(TypeCode::Float64));
        let inner = map.map_type.unwrap();
        assert_eq!(inner.key.code, TypeCode::String);
        assert_eq!(inner.value.code, TypeCode::Float64);

        let dec = Type::decimal(18, 4);
        assert_eq!(
            dec.decimal,
            Some(DecimalParams {
                precision: 18,
                scale: 4
            })
        );
    }

    #[test]
    fn type_serializes_compactly() {
        let json = serde_json::to_string(&Type::new(TypeCode::Int32)).unwrap();
        assert_eq!(json, r#"{"code":"int32","nullable":true}"#);
    }

    #[test]
    fn approx_size_counts_nested_lists() {
        let v = Value::List(vec![Value::Int(1), Value::Str("abc".into())]);
        assert_eq!(v.approx_size(), 8 + 3 + 8);
    }
}
