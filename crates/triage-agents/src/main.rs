//! Command-line entry point for the triage pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use triage_agents::audit;
use triage_agents::config::PipelineConfig;
use triage_agents::errors::RetryPolicy;
use triage_agents::export::{self, Bookmark, PostgresSink};
use triage_agents::generation::HttpResponseGenerator;
use triage_agents::notifier::{FailureNotifier, LogNotifier, WebhookNotifier};
use triage_agents::orchestrator::{run_pipeline, Orchestrator};
use triage_agents::persistence::{FsObjectStore, PersistenceWriter, TicketTable};
use triage_agents::producer;
use triage_agents::queue::SpoolQueue;
use triage_agents::sentiment::HttpSentimentClassifier;

#[derive(Parser)]
#[command(name = "triage-agents", about = "Support ticket triage pipeline")]
struct Cli {
    /// Optional TOML file overriding environment configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drain the spool and process every pending ticket.
    Run {
        /// Keep polling the spool instead of exiting after one drain.
        #[arg(long)]
        watch: bool,
    },
    /// Export processed records to the warehouse table.
    Export,
    /// Score persisted responses against the quality rubric.
    Audit,
    /// Spool synthetic ticket events.
    Generate {
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

const WATCH_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    // Configuration problems abort here, before any ticket is touched.
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_env_and_file(path)?,
        None => PipelineConfig::from_env()?,
    };

    match cli.command {
        Command::Run { watch } => run(config, watch).await,
        Command::Export => export_batch(config).await,
        Command::Audit => audit_batch(config).await,
        Command::Generate { count } => generate(config, count).await,
    }
}

async fn run(config: PipelineConfig, watch: bool) -> Result<()> {
    let queue = Arc::new(SpoolQueue::open(&config.spool_dir).await?);
    let store = Arc::new(FsObjectStore::new(&config.store_root));
    let table = match &config.postgres_dsn {
        Some(dsn) => Some(TicketTable::connect(dsn).await?),
        None => None,
    };
    let notifier: Arc<dyn FailureNotifier> = match &config.alert_webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => Arc::new(LogNotifier),
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    let orchestrator = Arc::new(
        Orchestrator::new(
            Arc::new(HttpSentimentClassifier::new(
                config.classifier.clone(),
                config.call_timeout,
            )),
            Arc::new(HttpResponseGenerator::new(
                config.generator.clone(),
                config.call_timeout,
            )),
            Arc::new(PersistenceWriter::new(store, table)),
            notifier,
            RetryPolicy::new(config.max_attempts, config.backoff_base),
        )
        .with_cancellation(cancel.clone()),
    );

    loop {
        let outcomes = run_pipeline(orchestrator.clone(), queue.clone()).await?;
        let failed = outcomes
            .iter()
            .filter(|o| !o.is_completed() && !o.is_cancelled())
            .count();
        if failed > 0 {
            tracing::warn!(total = outcomes.len(), failed, "drain finished with failures");
        }
        if !watch || cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(WATCH_INTERVAL) => {}
            _ = cancel.cancelled() => break,
        }
    }
    Ok(())
}

async fn export_batch(config: PipelineConfig) -> Result<()> {
    let dsn = config
        .postgres_dsn
        .as_deref()
        .context("export requires TRIAGE_POSTGRES_DSN")?;
    let store = FsObjectStore::new(&config.store_root);
    let sink = PostgresSink::connect(dsn).await?;
    let bookmark = Bookmark::new(&config.bookmark_path);

    let summary = export::run_export(&store, &sink, &config.warehouse_table, &bookmark).await?;
    tracing::info!(
        selected = summary.selected,
        loaded = summary.loaded,
        "export finished"
    );
    Ok(())
}

async fn audit_batch(config: PipelineConfig) -> Result<()> {
    let store = FsObjectStore::new(&config.store_root);
    let summary = audit::run_audit(&store, &config.audit_log).await?;
    tracing::info!(
        audited = summary.audited,
        passed = summary.passed,
        skipped = summary.skipped,
        "audit finished"
    );
    Ok(())
}

async fn generate(config: PipelineConfig, count: usize) -> Result<()> {
    let queue = SpoolQueue::open(&config.spool_dir).await?;
    let enqueued = producer::run_producer(&queue, count).await?;
    tracing::info!(enqueued, "generation finished");
    Ok(())
}
