//! tarnd: the Tarn source reconciliation daemon.
//!
//! `run` reconciles the declared sources into the embedded OLAP engine on an
//! interval and serves health and metrics. `check` validates a sources file.

mod evictor;
mod health;
mod slot;
mod sources;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tarn_connectors::default_registry;
use tarn_core::{ActivitySink, EngineRegistry, OlapConfig, OlapEngine, PrometheusSink};
use tarn_migrator::{
    normalize, Catalog, MemoryCatalog, MigratorConfig, PgCatalog, ReconcileReport, Reconciler,
    SourceMigrator,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use health::HealthState;
use slot::MigratorSlot;
use sources::{parse_vars, SourcesFile};

#[derive(Parser)]
#[command(name = "tarnd", about = "Tarn source reconciliation daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile sources on an interval and serve health and metrics
    Run {
        /// JSON file declaring the sources
        #[arg(long, env = "TARN_SOURCES")]
        sources: PathBuf,

        /// Root that relative local paths resolve against
        #[arg(long, env = "TARN_REPO_ROOT")]
        repo_root: Option<PathBuf>,

        /// Seconds between reconcile passes
        #[arg(long, default_value = "300", env = "TARN_RECONCILE_INTERVAL_SECS")]
        interval_secs: u64,

        /// Run a single pass and exit
        #[arg(long)]
        once: bool,

        /// Re-ingest every source on the first pass
        #[arg(long)]
        force: bool,

        /// PostgreSQL catalog; an in-memory catalog is used when omitted
        #[arg(long, env = "DATABASE_URL")]
        catalog_url: Option<String>,

        /// Port for /health, /ready and /metrics
        #[arg(long, default_value = "9090", env = "METRICS_PORT")]
        metrics_port: u16,

        /// Host address to bind to
        #[arg(long, default_value = "0.0.0.0", env = "BIND_HOST")]
        bind_host: String,

        /// Seconds an engine may sit idle before it is closed
        #[arg(long, default_value = "3600", env = "TARN_ENGINE_IDLE_SECS")]
        engine_idle_secs: u64,

        /// Connector variable, e.g. --var aws_region=eu-west-1
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },

    /// Validate a sources file
    Check {
        #[arg(long, env = "TARN_SOURCES")]
        sources: PathBuf,

        #[arg(long, env = "TARN_REPO_ROOT")]
        repo_root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            sources,
            repo_root,
            interval_secs,
            once,
            force,
            catalog_url,
            metrics_port,
            bind_host,
            engine_idle_secs,
            vars,
        } => {
            let mut config = MigratorConfig::from_env()?;
            if let Some(root) = repo_root {
                config.repo_root = root;
            }
            run(RunOpts {
                sources,
                config,
                interval: Duration::from_secs(interval_secs.max(1)),
                once,
                force,
                catalog_url,
                bind_addr: format!("{}:{}", bind_host, metrics_port),
                engine_idle: Duration::from_secs(engine_idle_secs),
                vars,
            })
            .await?;
        }
        Commands::Check { sources, repo_root } => {
            let mut config = MigratorConfig::from_env()?;
            if let Some(root) = repo_root {
                config.repo_root = root;
            }
            check(&sources, &config)?;
        }
    }

    Ok(())
}

struct RunOpts {
    sources: PathBuf,
    config: MigratorConfig,
    interval: Duration,
    once: bool,
    force: bool,
    catalog_url: Option<String>,
    bind_addr: String,
    engine_idle: Duration,
    vars: Vec<String>,
}

async fn run(opts: RunOpts) -> Result<()> {
    let vars = parse_vars(&opts.vars)?;
    let olap_config = OlapConfig::from_env()?;
    info!("Starting tarnd {}", olap_config.instance_id);

    let catalog: Arc<dyn Catalog> = match &opts.catalog_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .context("Failed to connect to catalog database")?;
            let catalog = PgCatalog::new(pool);
            catalog.migrate().await?;
            info!("Connected to catalog database");
            Arc::new(catalog)
        }
        None => {
            warn!("No catalog database configured, using an in-memory catalog");
            Arc::new(MemoryCatalog::new())
        }
    };

    let metrics = PrometheusSink::new();
    let activity: Arc<dyn ActivitySink> = Arc::new(metrics.clone());
    let ready = Arc::new(AtomicBool::new(false));

    if !opts.once {
        let router = health::health_router(Arc::new(HealthState {
            metrics,
            ready: ready.clone(),
        }));
        let listener = tokio::net::TcpListener::bind(&opts.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", opts.bind_addr))?;
        info!("Metrics server listening on {}", opts.bind_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    let engines = Arc::new(EngineRegistry::new());
    evictor::spawn_evictor(engines.clone(), opts.engine_idle, Duration::from_secs(60));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                shutdown.cancel();
            }
        });
    }

    let connectors = Arc::new(default_registry());
    let mut force = opts.force;
    let mut slot = MigratorSlot::default();
    loop {
        let pass = async {
            let file = SourcesFile::load(&opts.sources)?;
            let engine = engines
                .get_or_open(&olap_config.instance_id, || {
                    OlapEngine::open(olap_config.clone(), activity.clone())
                })
                .await?;
            let migrator = slot.get_or_build(engine, |engine| {
                SourceMigrator::new(
                    engine,
                    connectors.clone(),
                    opts.config.clone(),
                    activity.clone(),
                )
                .with_variables(vars.clone())
            });
            let reconciler = Reconciler::new(migrator, catalog.clone());
            let report = reconciler
                .reconcile(file.into_request(force), &shutdown)
                .await?;
            Ok::<_, anyhow::Error>(report)
        };

        match pass.await {
            Ok(report) => {
                log_report(&report);
                force = false;
                ready.store(true, Ordering::Relaxed);
                if opts.once {
                    let failed = report.errors().filter(|r| !is_empty_source(r)).count();
                    anyhow::ensure!(failed == 0, "{} source(s) failed to reconcile", failed);
                    return Ok(());
                }
            }
            Err(e) => {
                error!("Reconcile pass failed: {:#}", e);
                if opts.once {
                    return Err(e);
                }
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(opts.interval) => {}
        }
    }

    info!("tarnd stopped");
    Ok(())
}

fn is_empty_source(report: &tarn_migrator::SourceReport) -> bool {
    report.error.as_ref().is_some_and(|e| e.is_no_rows())
}

fn log_report(report: &ReconcileReport) {
    for source in &report.sources {
        match &source.error {
            None => info!(
                "{}: {:?} ({} bytes)",
                source.name, source.action, source.bytes_ingested
            ),
            Some(e) if e.is_no_rows() => info!("{}: no rows", source.name),
            Some(e) => warn!("{}: {:?} failed: {}", source.name, source.action, e),
        }
    }
}

fn check(path: &Path, config: &MigratorConfig) -> Result<()> {
    let file = SourcesFile::load(path)?;
    let known = default_registry().drivers();
    for source in &file.sources {
        let normalized = normalize(source, &config.repo_root, config.allow_host_access)
            .with_context(|| format!("source {}", source.name))?;
        anyhow::ensure!(
            normalized.connector == tarn_core::ENGINE_DRIVER
                || known.iter().any(|d| *d == normalized.connector),
            "source {}: unknown connector {}",
            source.name,
            normalized.connector
        );
    }
    println!("{} source(s) OK", file.sources.len());
    Ok(())
}
