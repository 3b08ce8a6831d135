//! The embedded OLAP engine: connection pool, statements, table management.

mod appender;
mod engine;
pub mod pool;
pub mod priority;
pub mod registry;
mod statement;

pub use appender::Appender;
pub use engine::{OlapEngine, TableInfo, DEFAULT_SCHEMA, ENGINE_DRIVER};
pub use pool::{Conn, ConnKind, ConnectionPool};
pub use registry::{EngineRegistry, PoolRegistry};
pub use statement::{QueryResult, Statement, CLEANUP_PRIORITY};

use datafusion::common::TableReference;

use crate::dialect::quote_identifier;

/// A possibly schema-qualified table name. Names are case sensitive and
/// always quoted when rendered into SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(schema: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.map(str::to_string),
            name: name.into(),
        }
    }

    /// Unqualified name in the default schema.
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(None, name)
    }

    pub fn qualified(schema: &str, name: impl Into<String>) -> Self {
        Self::new(Some(schema), name)
    }

    pub fn schema_or_default(&self) -> &str {
        self.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }

    /// SQL rendering, e.g. `"tarn_sources"."__orders_1700000000000"`.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(&self.name)),
            None => quote_identifier(&self.name),
        }
    }

    /// Engine reference that preserves case.
    pub fn reference(&self) -> TableReference {
        match &self.schema {
            Some(schema) => TableReference::partial(schema.as_str(), self.name.as_str()),
            None => TableReference::bare(self.name.as_str()),
        }
    }

    /// Key used for size bookkeeping.
    pub(crate) fn key(&self) -> String {
        format!("{}.{}", self.schema_or_default(), self.name)
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.quoted())
    }
}
