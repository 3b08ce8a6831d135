//! Source definitions and the catalog that records what has been built.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tarn_core::{ExtractPolicy, SourceProperties, SourceRequest};
use thiserror::Error;
use tracing::info;

/// A declared source: where data comes from and how to extract it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub name: String,
    /// Driver name, or the engine's own driver for SQL sources.
    pub connector: String,
    #[serde(default)]
    pub properties: SourceProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_policy: Option<ExtractPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Overrides the configured ingestion quota.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest_limit_bytes: Option<u64>,
}

impl SourceDefinition {
    pub fn new(name: impl Into<String>, connector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connector: connector.into(),
            properties: SourceProperties::new(),
            extract_policy: None,
            timeout_seconds: None,
            ingest_limit_bytes: None,
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn request(&self) -> SourceRequest {
        SourceRequest {
            properties: self.properties.clone(),
            extract_policy: self.extract_policy.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Table,
    View,
}

impl ObjectKind {
    fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "table" {
            ObjectKind::Table
        } else {
            ObjectKind::View
        }
    }
}

/// The built state of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub kind: ObjectKind,
    /// Definition the current object was built from, after normalisation.
    pub source: SourceDefinition,
    pub bytes_ingested: u64,
    pub refreshed_on: DateTime<Utc>,
    /// Staging table the view currently selects from.
    pub staging_table: Option<String>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog entry not found: {0}")]
    NotFound(String),
    #[error("catalog storage failed: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("catalog entry is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound(_))
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get(&self, name: &str) -> Result<CatalogEntry, CatalogError>;

    /// All entries ordered by name.
    async fn list(&self) -> Result<Vec<CatalogEntry>, CatalogError>;

    async fn upsert(&self, entry: &CatalogEntry) -> Result<(), CatalogError>;

    async fn delete(&self, name: &str) -> Result<(), CatalogError>;
}

// ---------------------------------------------------------------------------
// In-memory catalog
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCatalog {
    entries: Mutex<BTreeMap<String, CatalogEntry>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, CatalogEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn get(&self, name: &str) -> Result<CatalogEntry, CatalogError> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        Ok(self.lock().values().cloned().collect())
    }

    async fn upsert(&self, entry: &CatalogEntry) -> Result<(), CatalogError> {
        self.lock().insert(entry.name.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), CatalogError> {
        self.lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL catalog
// ---------------------------------------------------------------------------

type EntryRow = (
    String,
    String,
    serde_json::Value,
    i64,
    DateTime<Utc>,
    Option<String>,
);

const SELECT_ENTRY: &str =
    "SELECT name, kind, definition, bytes_ingested, refreshed_on, staging_table FROM tarn_catalog";

/// Catalog persisted in a PostgreSQL table, definitions stored as JSONB.
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the catalog table if it does not exist.
    pub async fn migrate(&self) -> Result<(), CatalogError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tarn_catalog (
                name TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                definition JSONB NOT NULL,
                bytes_ingested BIGINT NOT NULL DEFAULT 0,
                refreshed_on TIMESTAMPTZ NOT NULL,
                staging_table TEXT
            )",
        )
        .execute(&self.pool)
        .await?;
        info!("Catalog table ready");
        Ok(())
    }
}

fn entry_from_row(row: EntryRow) -> Result<CatalogEntry, CatalogError> {
    let (name, kind, definition, bytes_ingested, refreshed_on, staging_table) = row;
    Ok(CatalogEntry {
        name,
        kind: ObjectKind::parse(&kind),
        source: serde_json::from_value(definition)?,
        bytes_ingested: bytes_ingested.max(0) as u64,
        refreshed_on,
        staging_table,
    })
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn get(&self, name: &str) -> Result<CatalogEntry, CatalogError> {
        let row: Option<EntryRow> = sqlx::query_as(&format!("{} WHERE name = $1", SELECT_ENTRY))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => entry_from_row(row),
            None => Err(CatalogError::NotFound(name.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!("{} ORDER BY name", SELECT_ENTRY))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(entry_from_row).collect()
    }

    async fn upsert(&self, entry: &CatalogEntry) -> Result<(), CatalogError> {
        sqlx::query(
            "INSERT INTO tarn_catalog (name, kind, definition, bytes_ingested, refreshed_on, staging_table)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (name) DO UPDATE SET
                kind = EXCLUDED.kind,
                definition = EXCLUDED.definition,
                bytes_ingested = EXCLUDED.bytes_ingested,
                refreshed_on = EXCLUDED.refreshed_on,
                staging_table = EXCLUDED.staging_table",
        )
        .bind(&entry.name)
        .bind(entry.kind.as_str())
        .bind(serde_json::to_value(&entry.source)?)
        .bind(entry.bytes_ingested as i64)
        .bind(entry.refreshed_on)
        .bind(&entry.staging_table)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), CatalogError> {
        let result = sqlx::query("DELETE FROM tarn_catalog WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound(name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tarn_core::Strategy;

    fn entry(name: &str) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            kind: ObjectKind::View,
            source: SourceDefinition::new(name, "local_file").with_property("path", "data/x.csv"),
            bytes_ingested: 42,
            refreshed_on: Utc::now(),
            staging_table: Some(format!("__{}_1", name)),
        }
    }

    #[tokio::test]
    async fn memory_catalog_crud() {
        let catalog = MemoryCatalog::new();
        assert!(catalog.get("a").await.unwrap_err().is_not_found());

        catalog.upsert(&entry("b")).await.unwrap();
        catalog.upsert(&entry("a")).await.unwrap();
        let names: Vec<_> = catalog.list().await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        let mut updated = entry("a");
        updated.bytes_ingested = 7;
        catalog.upsert(&updated).await.unwrap();
        assert_eq!(catalog.get("a").await.unwrap().bytes_ingested, 7);

        catalog.delete("a").await.unwrap();
        assert!(catalog.delete("a").await.unwrap_err().is_not_found());
    }

    #[test]
    fn definitions_deserialize_with_defaults() {
        let def: SourceDefinition = serde_json::from_value(json!({
            "name": "orders",
            "connector": "s3",
            "properties": {"path": "s3://bucket/orders/*.parquet"},
            "extract_policy": {"files_strategy": "tail", "files_limit": 3}
        }))
        .unwrap();
        assert_eq!(def.timeout_seconds, None);
        let req = def.request();
        assert_eq!(req.extract_policy.files(), Some((Strategy::Tail, 3)));
        assert_eq!(req.properties["path"], json!("s3://bucket/orders/*.parquet"));
    }

    #[test]
    fn rows_decode_into_entries() {
        let original = entry("orders");
        let row: EntryRow = (
            original.name.clone(),
            "view".to_string(),
            serde_json::to_value(&original.source).unwrap(),
            42,
            original.refreshed_on,
            original.staging_table.clone(),
        );
        assert_eq!(entry_from_row(row).unwrap(), original);

        let bad: EntryRow = (
            "x".into(),
            "table".into(),
            json!({"connector": 3}),
            0,
            Utc::now(),
            None,
        );
        assert!(matches!(entry_from_row(bad), Err(CatalogError::Malformed(_))));
    }
}
