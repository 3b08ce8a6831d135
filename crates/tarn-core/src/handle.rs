//! Connector handles and the capabilities they advertise.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::iterator::RowIterator;
use crate::source::{ExtractPolicy, SourceProperties};
use crate::transport::Transporter;

/// What a handle can do for a transfer. Resolved once per ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Produces rows through [`SourceHandle::query`].
    RowIterator,
    /// Materialises local files through [`SourceHandle::fetch_files`].
    Files,
    /// Runs queries natively inside the destination engine.
    NativeQuery,
    /// Provides its own transporter into the given destination.
    TransportTo(Dialect),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn new(caps: impl IntoIterator<Item = Capability>) -> Self {
        Self(caps.into_iter().collect())
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    Parquet,
    Json,
}

impl FileFormat {
    /// Guess the format from a path's extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".csv") || lower.ends_with(".tsv") || lower.ends_with(".txt") {
            Some(FileFormat::Csv)
        } else if lower.ends_with(".parquet") {
            Some(FileFormat::Parquet)
        } else if lower.ends_with(".json") || lower.ends_with(".ndjson") || lower.ends_with(".jsonl")
        {
            Some(FileFormat::Json)
        } else {
            None
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "txt" => Some(FileFormat::Csv),
            "parquet" => Some(FileFormat::Parquet),
            "json" | "ndjson" | "jsonl" => Some(FileFormat::Json),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Parquet => "parquet",
            FileFormat::Json => "json",
        }
    }
}

/// Files made available on local disk for a transfer.
///
/// When the files were downloaded into a scratch directory, the directory
/// is removed when this value is dropped.
#[derive(Debug)]
pub struct LocalFiles {
    pub paths: Vec<PathBuf>,
    pub format: FileFormat,
    pub total_bytes: u64,
    pub delimiter: Option<u8>,
    pub has_header: bool,
    pub scratch: Option<tempfile::TempDir>,
}

/// Everything a handle needs to produce data for one source.
#[derive(Debug, Clone, Default)]
pub struct SourceRequest {
    pub properties: SourceProperties,
    pub extract_policy: ExtractPolicy,
}

/// An open connector.
#[async_trait]
pub trait SourceHandle: Send + Sync {
    /// Driver name, used in errors and telemetry tags.
    fn driver(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Open a row iterator for the source.
    async fn query(&self, _req: &SourceRequest) -> anyhow::Result<Box<dyn RowIterator>> {
        anyhow::bail!("{} cannot produce rows", self.driver())
    }

    /// Materialise the source as local files.
    async fn fetch_files(&self, _req: &SourceRequest) -> anyhow::Result<LocalFiles> {
        anyhow::bail!("{} cannot produce files", self.driver())
    }

    /// A transporter this handle provides into `destination`, if any.
    fn transporter(&self, _destination: Dialect) -> Option<Arc<dyn Transporter>> {
        None
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
