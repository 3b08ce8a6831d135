//! Reconcile loop: bring the engine and the catalog in line with a desired
//! set of sources.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, SourceDefinition};
use crate::error::MigrateError;
use crate::migrator::SourceMigrator;

/// Desired state for one reconcile pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileRequest {
    pub sources: Vec<SourceDefinition>,
    /// `(from, to)` pairs applied before anything else.
    pub renames: Vec<(String, String)>,
    /// Re-ingest every source even if unchanged.
    pub force_all: bool,
    /// Re-ingest these sources even if unchanged.
    pub force: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAction {
    Created,
    Updated,
    Unchanged,
    Renamed,
    Deleted,
}

#[derive(Debug)]
pub struct SourceReport {
    pub name: String,
    pub action: SourceAction,
    pub error: Option<MigrateError>,
    pub bytes_ingested: u64,
}

impl SourceReport {
    fn ok(name: &str, action: SourceAction, bytes_ingested: u64) -> Self {
        Self {
            name: name.to_string(),
            action,
            error: None,
            bytes_ingested,
        }
    }

    fn failed(name: &str, action: SourceAction, error: MigrateError) -> Self {
        Self {
            name: name.to_string(),
            action,
            error: Some(error),
            bytes_ingested: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub sources: Vec<SourceReport>,
}

impl ReconcileReport {
    pub fn get(&self, name: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|r| r.name == name)
    }

    pub fn errors(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|r| r.error.is_some())
    }

    pub fn is_ok(&self) -> bool {
        self.errors().next().is_none()
    }
}

pub struct Reconciler {
    migrator: Arc<SourceMigrator>,
    catalog: Arc<dyn Catalog>,
}

impl Reconciler {
    pub fn new(migrator: Arc<SourceMigrator>, catalog: Arc<dyn Catalog>) -> Self {
        Self { migrator, catalog }
    }

    pub fn migrator(&self) -> &Arc<SourceMigrator> {
        &self.migrator
    }

    pub async fn reconcile(
        &self,
        request: ReconcileRequest,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, MigrateError> {
        let mut report = ReconcileReport::default();

        for (from, to) in &request.renames {
            if let Some(outcome) = self.apply_rename(from, to).await {
                report.sources.push(outcome);
            }
        }

        let mut seen = BTreeSet::new();
        let mut desired = Vec::new();
        for source in request.sources {
            if !seen.insert(source.name.clone()) {
                return Err(MigrateError::Config(format!(
                    "source {} is declared more than once",
                    source.name
                )));
            }
            desired.push(source);
        }

        let existing: BTreeMap<String, _> = self
            .catalog
            .list()
            .await?
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect();

        let parallelism = self.migrator.config().parallelism.max(1);
        let force_all = request.force_all;
        let force = &request.force;
        let existing_ref = &existing;
        let results: Vec<SourceReport> = stream::iter(desired.iter())
            .map(|source| {
                let forced = force_all || force.contains(&source.name);
                async move { self.reconcile_source(source, existing_ref, forced, cancel).await }
            })
            .buffer_unordered(parallelism)
            .collect()
            .await;
        report.sources.extend(results);

        for name in existing.keys() {
            if seen.contains(name) {
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }
            report.sources.push(self.apply_delete(name).await);
        }

        report.sources.sort_by(|a, b| a.name.cmp(&b.name));
        let failed = report.errors().count();
        if failed > 0 {
            warn!("Reconciled {} sources, {} failed", report.sources.len(), failed);
        } else {
            info!("Reconciled {} sources", report.sources.len());
        }
        Ok(report)
    }

    async fn reconcile_source(
        &self,
        source: &SourceDefinition,
        existing: &BTreeMap<String, crate::catalog::CatalogEntry>,
        forced: bool,
        cancel: &CancellationToken,
    ) -> SourceReport {
        if cancel.is_cancelled() {
            return SourceReport::failed(&source.name, SourceAction::Unchanged, MigrateError::Cancelled);
        }

        let entry = existing.get(&source.name);
        let in_olap = match self.migrator.exists_in_olap(&source.name).await {
            Ok(found) => found,
            Err(e) => return SourceReport::failed(&source.name, SourceAction::Unchanged, e),
        };

        let (action, result) = match entry {
            Some(entry) if in_olap => {
                if !forced && self.migrator.is_equal(source, &entry.source) {
                    return SourceReport::ok(&source.name, SourceAction::Unchanged, entry.bytes_ingested);
                }
                (SourceAction::Updated, self.migrator.update(entry, source, cancel).await)
            }
            _ => (SourceAction::Created, self.migrator.create(source, cancel).await),
        };

        match result {
            Ok(new_entry) => {
                if let Err(e) = self.catalog.upsert(&new_entry).await {
                    error!("Failed to record source {} in catalog: {}", source.name, e);
                    return SourceReport::failed(&source.name, action, e.into());
                }
                SourceReport::ok(&source.name, action, new_entry.bytes_ingested)
            }
            Err(e) => {
                if e.is_no_rows() {
                    info!("Source {} produced no rows, nothing built", source.name);
                } else {
                    warn!("Failed to reconcile source {}: {}", source.name, e);
                }
                SourceReport::failed(&source.name, action, e)
            }
        }
    }

    /// Returns `None` when `from` is not in the catalog, i.e. the rename
    /// was already applied by an earlier pass.
    async fn apply_rename(&self, from: &str, to: &str) -> Option<SourceReport> {
        let mut entry = match self.catalog.get(from).await {
            Ok(entry) => entry,
            Err(e) if e.is_not_found() => return None,
            Err(e) => return Some(SourceReport::failed(to, SourceAction::Renamed, e.into())),
        };
        let result = async {
            entry.name = to.to_string();
            entry.source.name = to.to_string();
            self.migrator.rename(from, &entry).await?;
            if from != to {
                self.catalog.upsert(&entry).await?;
                self.catalog.delete(from).await?;
            }
            Ok::<_, MigrateError>(entry.bytes_ingested)
        }
        .await;
        Some(match result {
            Ok(bytes) => SourceReport::ok(to, SourceAction::Renamed, bytes),
            Err(e) => {
                warn!("Failed to rename source {} to {}: {}", from, to, e);
                SourceReport::failed(to, SourceAction::Renamed, e)
            }
        })
    }

    async fn apply_delete(&self, name: &str) -> SourceReport {
        let result = async {
            let entry = self.catalog.get(name).await?;
            self.migrator.delete(&entry).await?;
            self.catalog.delete(name).await?;
            Ok::<_, MigrateError>(())
        }
        .await;
        match result {
            Ok(()) => SourceReport::ok(name, SourceAction::Deleted, 0),
            Err(e) => {
                warn!("Failed to delete source {}: {}", name, e);
                SourceReport::failed(name, SourceAction::Deleted, e)
            }
        }
    }
}
