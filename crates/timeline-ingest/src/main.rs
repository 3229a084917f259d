//! Timeline ingestion runner.
//!
//! Runs the pipeline of one source system for one source instance and prints
//! progress as stages complete.
//!
//! # Usage
//!
//! ```bash
//! # Collect sprints, users and changelogs from files, rebuild history, convert users
//! timeline-ingest --source jira --source-id 1 \
//!     --changelog ./changelog.jsonl --reference ./reference.jsonl
//!
//! # Rebuild history from what is already collected
//! timeline-ingest --source jira --source-id 1 --tasks convertIssueHistory
//!
//! # Convert already collected projects
//! timeline-ingest --source gitlab --tasks convertProjects
//! ```
//!
//! Ctrl+C cancels the run: no further tasks start, running ones finish.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use timeline_core::metrics::{init_metrics, start_metrics_server};
use timeline_ingest::{
    ChangelogCollector, Config, JsonlCollector, JsonlConfig, ProjectCollector, Resources,
    SourceSystem, SqliteStore, WorkerScheduler,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Timeline ingestion runner.
#[derive(Parser, Debug)]
#[command(name = "timeline-ingest")]
#[command(about = "Collect changelogs and rebuild entity history")]
#[command(version)]
struct Args {
    /// Environment file to load before reading configuration
    #[arg(long, default_value = ".env")]
    dotenv: PathBuf,

    /// Source system to run
    #[arg(long, default_value = "jira")]
    source: SourceSystem,

    /// Source instance (connection) id
    #[arg(long, default_value = "1")]
    source_id: u64,

    /// Stages to run (comma-separated, default: all)
    #[arg(long, value_delimiter = ',')]
    tasks: Vec<String>,

    /// JSONL changelog file or directory to collect from
    #[arg(long)]
    changelog: Option<PathBuf>,

    /// JSONL file of sprint, user and project records to collect from
    #[arg(long)]
    reference: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.dotenv.exists() {
        dotenvy::from_path(&args.dotenv)
            .with_context(|| format!("Failed to load {}", args.dotenv.display()))?;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("timeline_ingest=debug".parse()?),
        )
        .init();

    let config = Config::from_env()?;

    if let Some(port) = config.metrics_port {
        start_metrics_server(port, init_metrics()).await?;
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, cancelling run...");
        on_signal.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("Failed to open store at {}", config.db_path.display()))?;

    let collector = match (&args.changelog, &args.reference) {
        (None, None) => None,
        (changelog, reference) => {
            let mut collector = match changelog {
                Some(path) => JsonlCollector::load(JsonlConfig {
                    input: path.clone(),
                    ..Default::default()
                })
                .with_context(|| format!("Failed to load {}", path.display()))?,
                None => JsonlCollector::default(),
            };
            if let Some(path) = reference {
                collector = collector
                    .with_reference(path)
                    .with_context(|| format!("Failed to load {}", path.display()))?;
            }
            Some(Arc::new(collector))
        }
    };

    let credentials = Arc::clone(&config.credentials);
    let scheduler = Arc::new(
        WorkerScheduler::new(credentials.scheduler_config(cancel.clone()))
            .context("Failed to create scheduler")?,
    );
    let resources = Resources {
        store: Arc::new(store),
        credentials,
        collector: collector
            .clone()
            .map(|c| c as Arc<dyn ChangelogCollector>),
        projects: collector.map(|c| c as Arc<dyn ProjectCollector>),
    };

    let pipeline = args
        .source
        .build_pipeline(scheduler, args.source_id, &resources);
    tracing::info!(
        "Running {} pipeline for source {} (stages: {})",
        args.source,
        args.source_id,
        if args.tasks.is_empty() {
            pipeline.stage_names().join(",")
        } else {
            args.tasks.join(",")
        }
    );

    let (progress_tx, mut progress_rx) = mpsc::channel(16);
    let printer = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            println!("progress: {:.0}%", progress * 100.0);
        }
    });

    let result = pipeline.run(&args.tasks, progress_tx).await;
    printer.await.context("Progress printer failed")?;

    match result {
        Ok(()) => {
            tracing::info!("Run complete");
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            tracing::warn!("Run cancelled");
            Ok(())
        }
        Err(e) => Err(e).context("Pipeline failed"),
    }
}
