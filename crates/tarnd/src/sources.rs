//! The declared sources file and `--var` parsing.
//!
//! ```json
//! {
//!   "sources": [
//!     {"name": "orders", "connector": "s3", "properties": {"path": "s3://bucket/orders/*.parquet"}}
//!   ],
//!   "renames": [{"from": "Orders", "to": "orders"}]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tarn_migrator::{ReconcileRequest, SourceDefinition};

#[derive(Debug, Deserialize)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize)]
pub struct SourcesFile {
    pub sources: Vec<SourceDefinition>,
    #[serde(default)]
    pub renames: Vec<Rename>,
}

impl SourcesFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sources file {}", path.display()))?;
        let file: SourcesFile = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid sources file {}", path.display()))?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for source in &self.sources {
            if source.name.is_empty() {
                bail!("source name must not be empty");
            }
            if source.name.starts_with("__") {
                bail!("source name {} uses the reserved \"__\" prefix", source.name);
            }
            if !names.insert(source.name.as_str()) {
                bail!("source {} is declared more than once", source.name);
            }
        }
        Ok(())
    }

    pub fn into_request(self, force_all: bool) -> ReconcileRequest {
        ReconcileRequest {
            sources: self.sources,
            renames: self.renames.into_iter().map(|r| (r.from, r.to)).collect(),
            force_all,
            force: BTreeSet::new(),
        }
    }
}

/// Parse `KEY=VALUE` pairs. Keys are lower-cased.
pub fn parse_vars(raw: &[String]) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_ascii_lowercase(), value.to_string()))
            }
            _ => bail!("Invalid --var {:?}, expected KEY=VALUE", pair),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("sources.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_sources_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            r#"{
                "sources": [
                    {"name": "orders", "connector": "local_file", "properties": {"path": "data/orders.csv"}},
                    {"name": "events", "connector": "datafusion",
                     "properties": {"sql": "SELECT * FROM read_parquet('s3://b/e.parquet')"},
                     "timeout_seconds": 60}
                ],
                "renames": [{"from": "Orders", "to": "orders"}]
            }"#,
        );
        let file = SourcesFile::load(&path).unwrap();
        assert_eq!(file.sources.len(), 2);
        assert_eq!(file.sources[1].timeout_seconds, Some(60));

        let req = file.into_request(true);
        assert!(req.force_all);
        assert_eq!(req.renames, vec![("Orders".to_string(), "orders".to_string())]);
    }

    #[test]
    fn rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let dup = write(
            dir.path(),
            r#"{"sources": [{"name": "a", "connector": "inline"}, {"name": "a", "connector": "inline"}]}"#,
        );
        assert!(SourcesFile::load(&dup).is_err());

        let reserved = write(dir.path(), r#"{"sources": [{"name": "__a_1", "connector": "inline"}]}"#);
        assert!(SourcesFile::load(&reserved).is_err());

        assert!(SourcesFile::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn vars_are_lowercased() {
        let vars = parse_vars(&[
            "AWS_REGION=eu-west-1".to_string(),
            "database_url=postgres://u:p=x@db/app".to_string(),
        ])
        .unwrap();
        assert_eq!(vars["aws_region"], "eu-west-1");
        assert_eq!(vars["database_url"], "postgres://u:p=x@db/app");

        assert!(parse_vars(&["novalue".to_string()]).is_err());
        assert!(parse_vars(&["=x".to_string()]).is_err());
    }
}
