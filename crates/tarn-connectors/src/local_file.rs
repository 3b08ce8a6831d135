//! Files on the local filesystem, addressed relative to the repo root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tarn_core::fileutil::{list_local_files, resolve_local_path};
use tarn_core::iterator::{IteratorError, ProgressUnit, RowIterator};
use tarn_core::source::{prop_bool, prop_str};
use tarn_core::{
    Capabilities, Capability, Field, FileFormat, LocalFiles, Row, SourceHandle, SourceRequest,
    StructType, Type, TypeCode, Value,
};
use tracing::debug;

use crate::error::ConnectorError;
use crate::extract::apply_rows_policy;

pub const DRIVER: &str = "local_file";

pub struct LocalFileHandle {
    root: PathBuf,
    allow_host_access: bool,
}

impl LocalFileHandle {
    pub fn new(root: PathBuf, allow_host_access: bool) -> Self {
        Self {
            root,
            allow_host_access,
        }
    }

    fn matched_files(&self, req: &SourceRequest) -> Result<Vec<(PathBuf, u64)>, ConnectorError> {
        let path = prop_str(&req.properties, "path")
            .ok_or_else(|| ConnectorError::ConfigError("property \"path\" is mandatory".to_string()))?;
        let resolved = resolve_local_path(path, &self.root, self.allow_host_access)
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;
        let files = list_local_files(&resolved).map_err(|e| ConnectorError::NotFound(e.to_string()))?;
        Ok(req.extract_policy.select_files(files))
    }
}

/// Format from the `format` property, else from the first file's extension.
pub(crate) fn resolve_format(req: &SourceRequest, first: &Path) -> Result<FileFormat, ConnectorError> {
    if let Some(name) = prop_str(&req.properties, "format") {
        return FileFormat::parse(name)
            .ok_or_else(|| ConnectorError::ConfigError(format!("unknown format {}", name)));
    }
    FileFormat::from_path(&first.to_string_lossy()).ok_or_else(|| {
        ConnectorError::ConfigError(format!(
            "cannot infer format of {}, set the \"format\" property",
            first.display()
        ))
    })
}

pub(crate) fn csv_delimiter(req: &SourceRequest) -> Option<u8> {
    prop_str(&req.properties, "delimiter").and_then(|d| d.bytes().next())
}

#[async_trait]
impl SourceHandle for LocalFileHandle {
    fn driver(&self) -> &str {
        DRIVER
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new([Capability::Files, Capability::RowIterator])
    }

    async fn fetch_files(&self, req: &SourceRequest) -> anyhow::Result<LocalFiles> {
        let files = self.matched_files(req)?;
        let Some((first, _)) = files.first() else {
            return Ok(LocalFiles {
                paths: vec![],
                format: FileFormat::Csv,
                total_bytes: 0,
                delimiter: None,
                has_header: true,
                scratch: None,
            });
        };
        let format = resolve_format(req, first)?;
        let has_header = prop_bool(&req.properties, "header").unwrap_or(true);
        let delimiter = csv_delimiter(req);

        let rows_policy = req.extract_policy.rows().filter(|_| format == FileFormat::Csv);
        let Some((strategy, limit)) = rows_policy else {
            let total_bytes = files.iter().map(|(_, size)| size).sum();
            return Ok(LocalFiles {
                paths: files.into_iter().map(|(p, _)| p).collect(),
                format,
                total_bytes,
                delimiter,
                has_header,
                scratch: None,
            });
        };

        // Trimmed copies go to a scratch directory; sources are never modified.
        let scratch = tempfile::tempdir()?;
        let mut paths = Vec::with_capacity(files.len());
        let mut total_bytes = 0u64;
        for (i, (path, _)) in files.iter().enumerate() {
            let data = tokio::fs::read(path).await?;
            let trimmed = apply_rows_policy(&data, strategy, limit);
            let target = scratch.path().join(format!("{:04}.csv", i));
            tokio::fs::write(&target, &trimmed).await?;
            total_bytes += trimmed.len() as u64;
            paths.push(target);
        }
        debug!(
            "Applied {:?} rows policy ({} bytes) to {} file(s)",
            strategy,
            limit,
            paths.len()
        );
        Ok(LocalFiles {
            paths,
            format,
            total_bytes,
            delimiter,
            has_header,
            scratch: Some(scratch),
        })
    }

    async fn query(&self, req: &SourceRequest) -> anyhow::Result<Box<dyn RowIterator>> {
        let files = self.fetch_files(req).await?;
        if files.format != FileFormat::Csv {
            return Err(ConnectorError::ConfigError(format!(
                "row iteration supports csv only, got {}",
                files.format.extension()
            ))
            .into());
        }
        Ok(Box::new(CsvRowIterator::new(files)))
    }
}

// ---------------------------------------------------------------------------
// CSV row iterator
// ---------------------------------------------------------------------------

/// Reads CSV files one after another. Every column is a string; the first
/// file's header names the columns.
pub struct CsvRowIterator {
    files: LocalFiles,
    next_file: usize,
    reader: Option<csv::Reader<std::fs::File>>,
    schema: Option<StructType>,
    record: csv::StringRecord,
}

impl CsvRowIterator {
    pub fn new(files: LocalFiles) -> Self {
        Self {
            files,
            next_file: 0,
            reader: None,
            schema: None,
            record: csv::StringRecord::new(),
        }
    }

    fn open_next(&mut self) -> anyhow::Result<bool> {
        let Some(path) = self.files.paths.get(self.next_file) else {
            self.reader = None;
            return Ok(false);
        };
        self.next_file += 1;
        let mut builder = csv::ReaderBuilder::new();
        builder.has_headers(self.files.has_header).flexible(true);
        if let Some(d) = self.files.delimiter {
            builder.delimiter(d);
        }
        let mut reader = builder.from_path(path)?;
        if self.schema.is_none() {
            let names: Vec<String> = if self.files.has_header {
                reader.headers()?.iter().map(str::to_string).collect()
            } else {
                let mut probe = csv::StringRecord::new();
                let width = if reader.read_record(&mut probe)? { probe.len() } else { 0 };
                // Re-open so the probed record is not lost.
                reader = builder.from_path(path)?;
                (0..width).map(|i| format!("column{}", i)).collect()
            };
            if !names.is_empty() {
                self.schema = Some(StructType::new(
                    names
                        .into_iter()
                        .map(|n| Field::new(n, Type::new(TypeCode::String)))
                        .collect(),
                ));
            }
        }
        self.reader = Some(reader);
        Ok(true)
    }

    fn read_row(&mut self) -> anyhow::Result<Option<Row>> {
        loop {
            if self.reader.is_none() && !self.open_next()? {
                return Ok(None);
            }
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            if reader.read_record(&mut self.record)? {
                let width = self.schema.as_ref().map(|s| s.len()).unwrap_or(0);
                let mut row: Row = self
                    .record
                    .iter()
                    .take(width)
                    .map(|v| {
                        if v.is_empty() {
                            Value::Null
                        } else {
                            Value::Str(v.to_string())
                        }
                    })
                    .collect();
                row.resize(width, Value::Null);
                return Ok(Some(row));
            }
            self.reader = None;
        }
    }
}

#[async_trait]
impl RowIterator for CsvRowIterator {
    async fn schema(&mut self) -> Result<StructType, IteratorError> {
        while self.schema.is_none() {
            if !self.open_next()? {
                return Err(IteratorError::Done);
            }
        }
        self.schema.clone().ok_or(IteratorError::Done)
    }

    async fn next(&mut self) -> Result<Row, IteratorError> {
        if self.schema.is_none() {
            self.schema().await?;
        }
        self.read_row()?.ok_or(IteratorError::Done)
    }

    fn size(&self, unit: ProgressUnit) -> Option<u64> {
        match unit {
            ProgressUnit::Bytes => Some(self.files.total_bytes),
            ProgressUnit::Records => None,
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.reader = None;
        self.next_file = self.files.paths.len();
        Ok(())
    }
}
