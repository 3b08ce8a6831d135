//! S3 and GCS sources: glob listing, extract policies and download to a
//! scratch directory.
//!
//! Listing is bounded so a careless glob cannot enumerate a whole bucket.

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, GetRange, ObjectMeta, ObjectStore};
use tarn_core::fileutil::{glob_match, glob_prefix, is_glob};
use tarn_core::source::{prop_bool, prop_str, prop_u64};
use tarn_core::{Capabilities, Capability, FileFormat, LocalFiles, SourceHandle, SourceRequest, Strategy};
use tracing::{debug, info};
use url::Url;

use crate::error::ConnectorError;
use crate::extract::{first_line, head_lines, tail_lines, HEADER_SAMPLE_BYTES};
use crate::local_file::{csv_delimiter, resolve_format};
use crate::registry::ConnectorConfig;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Credentials and endpoint for S3-compatible storage.
///
/// Secrets are redacted in `Debug` output. Missing keys fall back to the
/// standard `AWS_*` environment variables.
#[derive(Clone, Default)]
pub struct S3Config {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Custom endpoint (MinIO, LocalStack).
    pub endpoint_url: Option<String>,
    pub allow_http: bool,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "***"))
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .field("endpoint_url", &self.endpoint_url)
            .field("allow_http", &self.allow_http)
            .finish()
    }
}

impl S3Config {
    pub fn from_vars(config: &ConnectorConfig) -> Self {
        Self {
            region: config.var("aws_region").map(str::to_string),
            access_key_id: config.var("aws_access_key_id").map(str::to_string),
            secret_access_key: config.var("aws_secret_access_key").map(str::to_string),
            session_token: config.var("aws_session_token").map(str::to_string),
            endpoint_url: config.var("aws_endpoint_url").map(str::to_string),
            allow_http: config
                .var("aws_allow_http")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    fn build_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, ConnectorError> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = &self.region {
            builder = builder.with_region(region);
        }
        if let Some(key) = &self.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &self.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(token) = &self.session_token {
            builder = builder.with_token(token);
        }
        if let Some(endpoint) = &self.endpoint_url {
            builder = builder.with_endpoint(endpoint);
        }
        if self.allow_http {
            builder = builder.with_allow_http(true);
        }
        let store = builder
            .build()
            .map_err(|e| ConnectorError::ConnectionFailed(format!("failed to build S3 object store: {}", e)))?;
        Ok(Arc::new(store))
    }
}

/// Google Cloud Storage credentials. Without an explicit service account
/// key the standard `GOOGLE_*` environment variables apply.
#[derive(Clone, Default)]
pub struct GcsConfig {
    /// Service account key JSON.
    pub service_account_key: Option<String>,
}

impl std::fmt::Debug for GcsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsConfig")
            .field("service_account_key", &self.service_account_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl GcsConfig {
    pub fn from_vars(config: &ConnectorConfig) -> Self {
        Self {
            service_account_key: config.var("google_application_credentials").map(str::to_string),
        }
    }

    fn build_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, ConnectorError> {
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
        if let Some(key) = &self.service_account_key {
            builder = builder.with_service_account_key(key);
        }
        let store = builder
            .build()
            .map_err(|e| ConnectorError::ConnectionFailed(format!("failed to build GCS object store: {}", e)))?;
        Ok(Arc::new(store))
    }
}

// ---------------------------------------------------------------------------
// Glob limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobLimits {
    /// Upper bound on the summed size of matched objects.
    pub max_total_size: u64,
    pub max_objects_matched: usize,
    pub max_objects_listed: usize,
}

impl Default for GlobLimits {
    fn default() -> Self {
        Self {
            max_total_size: 10 * 1024 * 1024 * 1024,
            max_objects_matched: 1_000,
            max_objects_listed: 1_000_000,
        }
    }
}

impl GlobLimits {
    /// Defaults overridden by `glob.*` source properties.
    pub fn from_request(req: &SourceRequest) -> Self {
        let d = Self::default();
        let props = &req.properties;
        Self {
            max_total_size: prop_u64(props, "glob.max_total_size").unwrap_or(d.max_total_size),
            max_objects_matched: prop_u64(props, "glob.max_objects_matched")
                .map(|v| v as usize)
                .unwrap_or(d.max_objects_matched),
            max_objects_listed: prop_u64(props, "glob.max_objects_listed")
                .map(|v| v as usize)
                .unwrap_or(d.max_objects_listed),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Backend {
    S3(S3Config),
    Gcs(GcsConfig),
}

pub struct ObjectStoreHandle {
    backend: Backend,
}

impl ObjectStoreHandle {
    pub fn s3(config: S3Config) -> Self {
        Self {
            backend: Backend::S3(config),
        }
    }

    pub fn gcs(config: GcsConfig) -> Self {
        Self {
            backend: Backend::Gcs(config),
        }
    }

    fn scheme(&self) -> &'static str {
        match self.backend {
            Backend::S3(_) => "s3",
            Backend::Gcs(_) => "gs",
        }
    }
}

#[async_trait]
impl SourceHandle for ObjectStoreHandle {
    fn driver(&self) -> &str {
        match self.backend {
            Backend::S3(_) => "s3",
            Backend::Gcs(_) => "gcs",
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new([Capability::Files])
    }

    async fn fetch_files(&self, req: &SourceRequest) -> anyhow::Result<LocalFiles> {
        let path = prop_str(&req.properties, "path")
            .ok_or_else(|| ConnectorError::ConfigError("property \"path\" is mandatory".to_string()))?;
        let (bucket, pattern) = parse_object_url(path, self.scheme())?;
        let store = match &self.backend {
            Backend::S3(config) => config.build_store(&bucket)?,
            Backend::Gcs(config) => config.build_store(&bucket)?,
        };
        Ok(download(store.as_ref(), &pattern, req).await?)
    }
}

/// Split `s3://bucket/key/glob` into the bucket and the key pattern.
pub fn parse_object_url(path: &str, scheme: &str) -> Result<(String, String), ConnectorError> {
    let url = Url::parse(path).map_err(|e| ConnectorError::ConfigError(format!("invalid path {}: {}", path, e)))?;
    if url.scheme() != scheme {
        return Err(ConnectorError::ConfigError(format!(
            "path must start with {}://, got {}",
            scheme, path
        )));
    }
    let bucket = url
        .host_str()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ConnectorError::ConfigError(format!("missing bucket in {}", path)))?
        .to_string();
    // Take the key from the raw string so glob characters are not
    // percent-encoded.
    let key = path
        .split_once("://")
        .and_then(|(_, rest)| rest.split_once('/'))
        .map(|(_, key)| key.to_string())
        .unwrap_or_default();
    if key.is_empty() {
        return Err(ConnectorError::ConfigError(format!("missing object key in {}", path)));
    }
    Ok((bucket, key))
}

/// Objects matching `pattern` in key order, within `limits`.
pub async fn list_matching(
    store: &dyn ObjectStore,
    pattern: &str,
    limits: GlobLimits,
) -> Result<Vec<ObjectMeta>, ConnectorError> {
    if !is_glob(pattern) {
        let meta = store.head(&ObjectPath::from(pattern)).await?;
        return Ok(vec![meta]);
    }

    let prefix = glob_prefix(pattern).trim_end_matches('/');
    let prefix = (!prefix.is_empty()).then(|| ObjectPath::from(prefix));
    let mut listing = store.list(prefix.as_ref());

    let mut listed = 0usize;
    let mut total_size = 0u64;
    let mut matched = Vec::new();
    while let Some(meta) = listing.try_next().await? {
        listed += 1;
        if listed > limits.max_objects_listed {
            return Err(ConnectorError::QueryFailed(format!(
                "glob {} listed more than {} objects",
                pattern, limits.max_objects_listed
            )));
        }
        if !glob_match(pattern, meta.location.as_ref()) {
            continue;
        }
        total_size += meta.size as u64;
        if matched.len() >= limits.max_objects_matched {
            return Err(ConnectorError::QueryFailed(format!(
                "glob {} matched more than {} objects",
                pattern, limits.max_objects_matched
            )));
        }
        if total_size > limits.max_total_size {
            return Err(ConnectorError::QueryFailed(format!(
                "glob {} matched more than {} bytes",
                pattern, limits.max_total_size
            )));
        }
        matched.push(meta);
    }
    matched.sort_by(|a, b| a.location.cmp(&b.location));
    debug!("Glob {} matched {} of {} listed objects", pattern, matched.len(), listed);
    Ok(matched)
}

/// List, apply extract policies and download matches into a scratch
/// directory owned by the returned [`LocalFiles`].
pub async fn download(
    store: &dyn ObjectStore,
    pattern: &str,
    req: &SourceRequest,
) -> Result<LocalFiles, ConnectorError> {
    let objects = list_matching(store, pattern, GlobLimits::from_request(req)).await?;
    let objects = req.extract_policy.select_files(objects);

    let scratch = tempfile::tempdir()?;
    let Some(first) = objects.first() else {
        return Ok(LocalFiles {
            paths: vec![],
            format: FileFormat::Csv,
            total_bytes: 0,
            delimiter: None,
            has_header: true,
            scratch: Some(scratch),
        });
    };
    let format = resolve_format(req, std::path::Path::new(first.location.as_ref()))?;
    let rows_policy = req.extract_policy.rows().filter(|_| format == FileFormat::Csv);

    let mut paths = Vec::with_capacity(objects.len());
    let mut total_bytes = 0u64;
    for (i, meta) in objects.iter().enumerate() {
        let data = match rows_policy {
            Some((strategy, limit)) if (meta.size as u64) > limit => {
                fetch_trimmed(store, meta, strategy, limit).await?
            }
            _ => store.get(&meta.location).await?.bytes().await?.to_vec(),
        };
        let name = meta.location.filename().unwrap_or("object");
        let target = scratch.path().join(format!("{:04}_{}", i, name));
        tokio::fs::write(&target, &data).await?;
        total_bytes += data.len() as u64;
        paths.push(target);
    }
    info!("Downloaded {} object(s), {} bytes", paths.len(), total_bytes);

    Ok(LocalFiles {
        paths,
        format,
        total_bytes,
        delimiter: csv_delimiter(req),
        has_header: prop_bool(&req.properties, "header").unwrap_or(true),
        scratch: Some(scratch),
    })
}

/// Fetch only the byte ranges a rows policy keeps.
async fn fetch_trimmed(
    store: &dyn ObjectStore,
    meta: &ObjectMeta,
    strategy: Strategy,
    limit: u64,
) -> Result<Vec<u8>, ConnectorError> {
    let get = |range: GetRange| GetOptions {
        range: Some(range),
        ..Default::default()
    };
    match strategy {
        Strategy::Tail => {
            let sample = (meta.size as u64).min(HEADER_SAMPLE_BYTES);
            let head = store
                .get_opts(&meta.location, get(GetRange::Bounded(0..sample as usize)))
                .await?
                .bytes()
                .await?;
            let window = store
                .get_opts(&meta.location, get(GetRange::Suffix(limit as usize)))
                .await?
                .bytes()
                .await?;
            Ok(tail_lines(first_line(&head), &window))
        }
        _ => {
            let window = store
                .get_opts(&meta.location, get(GetRange::Bounded(0..limit as usize)))
                .await?
                .bytes()
                .await?;
            Ok(head_lines(&window, limit).to_vec())
        }
    }
}
