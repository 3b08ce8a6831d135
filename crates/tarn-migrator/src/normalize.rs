//! Normalisation and equality of source definitions.
//!
//! A SQL source run by the engine itself (`read_csv('s3://...')`) is
//! re-expressed as the connector its single path points at, so remote data
//! is fetched by the right connector and local paths are pinned to the repo
//! root.

use std::path::Path;

use serde_json::Value as Json;
use tarn_core::fileutil::resolve_local_path;
use tarn_core::sql_refs::{rewrite_table_function_paths, table_function_refs};
use tarn_core::ENGINE_DRIVER;

use crate::catalog::SourceDefinition;
use crate::error::MigrateError;

/// Connector a table function path belongs to.
fn embedded_connector(path: &str) -> Option<&'static str> {
    if path.starts_with("s3://") {
        Some("s3")
    } else if path.starts_with("gs://") || path.starts_with("gcs://") {
        Some("gcs")
    } else if path.contains("://") {
        None
    } else {
        Some("local_file")
    }
}

/// Rewrite an engine SQL source from its single table function reference.
/// Other sources are returned unchanged.
pub fn normalize(
    source: &SourceDefinition,
    repo_root: &Path,
    allow_host_access: bool,
) -> Result<SourceDefinition, MigrateError> {
    let mut out = source.clone();
    if source.connector != ENGINE_DRIVER {
        return Ok(out);
    }
    let sql = match source.properties.get("sql") {
        None => return Ok(out),
        Some(Json::String(sql)) => sql.as_str(),
        Some(_) => return Err(MigrateError::Config("query should be a string".to_string())),
    };

    let refs = table_function_refs(sql).map_err(|e| MigrateError::Config(e.to_string()))?;
    let [table_ref] = refs.as_slice() else {
        return Err(MigrateError::Config(
            "sql source should have exactly one table reference".to_string(),
        ));
    };
    let path = match table_ref.paths.as_slice() {
        [] => {
            return Err(MigrateError::Config(
                "only read_* functions with a single path are supported".to_string(),
            ))
        }
        [path] => path,
        _ => {
            return Err(MigrateError::Config(
                "only a single path per source is supported".to_string(),
            ))
        }
    };

    let connector = embedded_connector(path)
        .ok_or_else(|| MigrateError::Config(format!("unknown source path {}", path)))?;
    let sql = match connector {
        "local_file" => rewrite_table_function_paths(sql, |p| {
            resolve_local_path(p, repo_root, allow_host_access).map(|p| p.to_string_lossy().into_owned())
        })
        .map_err(|e| MigrateError::Config(e.to_string()))?,
        _ => {
            out.connector = connector.to_string();
            out.properties.insert("path".to_string(), Json::String(path.clone()));
            sql.to_string()
        }
    };
    out.properties.insert("sql".to_string(), Json::String(sql));
    Ok(out)
}

/// Structural equality of two definitions.
///
/// An engine SQL source compared against an `s3`/`gcs` source ignores the
/// latter's `path`, which normalisation derived from the SQL.
pub fn sources_equal(desired: &SourceDefinition, existing: &SourceDefinition) -> bool {
    let sql_vs_path = desired.connector == ENGINE_DRIVER
        && (existing.connector == "s3" || existing.connector == "gcs");
    if !sql_vs_path && desired.connector != existing.connector {
        return false;
    }
    if desired.extract_policy.unwrap_or_default() != existing.extract_policy.unwrap_or_default() {
        return false;
    }
    if sql_vs_path {
        let mut props = existing.properties.clone();
        props.remove("path");
        return desired.properties == props;
    }
    desired.properties == existing.properties
}
