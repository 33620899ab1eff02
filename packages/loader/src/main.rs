//! Provenance Batch Loader
//!
//! Loads a CSV provenance feed into a libsql graph store.
//!
//! # Usage
//!
//! ```bash
//! provgraph-load feed.csv --database ./data/provenance.db
//!
//! # Layered config: file, then PROVGRAPH_* env vars, then flags
//! PROVGRAPH_MAX_CONCURRENCY=8 provgraph-load feed.csv --config loader.json --stop-on-error
//! ```
//!
//! # Environment Variables
//!
//! - `PROVGRAPH_*`: any `LoaderConfig` setting, e.g. `PROVGRAPH_ROW_TIMEOUT_MS`
//! - `RUST_LOG`: Logging level (e.g., "info", "debug", "trace")
//!
//! # Exit codes
//!
//! - `0`: every row succeeded
//! - `1`: the batch finished (or was cancelled) with failed or skipped rows
//! - `2`: fatal: bad configuration, store or source unavailable, or the
//!   batch was aborted after repeated connection loss

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::stream;
use provgraph_core::{
    AbortReason, BatchCoordinator, BatchOptions, BatchReport, CancelSignal, CsvRowSource,
    GraphDatabase, GraphStats, GraphStore, LabelCase, LabelRegistry, LibsqlGraphStore,
    LoaderConfig,
};

#[derive(Parser, Debug)]
#[command(name = "provgraph-load", version, about = "Merge a provenance CSV feed into a graph store")]
struct Cli {
    /// CSV feed with a header row
    source: PathBuf,

    /// Graph database file
    #[arg(long)]
    database: Option<PathBuf>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rows merged concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-attempt deadline for one row transaction
    #[arg(long)]
    row_timeout_ms: Option<u64>,

    /// Attempts per row, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Abort the batch on the first failed row
    #[arg(long)]
    stop_on_error: bool,

    /// Capitalize node labels before validation
    #[arg(long)]
    capitalize_labels: bool,

    /// Print the batch report as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Resolve the effective configuration, lowest precedence first
    fn config(&self) -> anyhow::Result<LoaderConfig> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::from_file(path)?,
            None => LoaderConfig::default(),
        };
        config.apply_env()?;
        self.apply_flags(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply_flags(&self, config: &mut LoaderConfig) {
        if let Some(database) = &self.database {
            config.database_path = database.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.max_concurrency = concurrency;
        }
        if let Some(row_timeout_ms) = self.row_timeout_ms {
            config.row_timeout_ms = row_timeout_ms;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        if self.stop_on_error {
            config.stop_on_error = true;
        }
        if self.capitalize_labels {
            config.label_case = LabelCase::Capitalize;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match load(&cli).await {
        Ok(report) => exit_code(&report),
        Err(e) => {
            tracing::error!("Load failed: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn load(cli: &Cli) -> anyhow::Result<BatchReport> {
    let config = cli.config().context("Invalid loader configuration")?;

    tracing::info!("Source: {}", cli.source.display());
    tracing::info!("Database: {}", config.database_path.display());

    let db = GraphDatabase::with_busy_timeout(config.database_path.clone(), config.busy_timeout())
        .await
        .context("Failed to open graph store")?;
    let store: Arc<dyn GraphStore> = Arc::new(LibsqlGraphStore::new(
        Arc::new(db),
        config.max_connections,
    ));

    let mut registry = LabelRegistry::new(store.label_syntax(), config.label_case);
    if let Some(known) = &config.known_labels {
        registry = registry.with_known(known);
    }

    let source = CsvRowSource::from_path(&cli.source)
        .with_context(|| format!("Failed to read source {}", cli.source.display()))?;

    let coordinator = BatchCoordinator::new(store.clone(), registry, BatchOptions::from(&config));

    let cancel = CancelSignal::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing in-flight rows");
                cancel.cancel();
            }
        })
    };

    let report = coordinator.run(stream::iter(source.rows()), &cancel).await;
    interrupt.abort();

    let stats = match store.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!("Could not read graph totals: {}", e);
            None
        }
    };
    if let Err(e) = store.close().await {
        tracing::warn!("Failed to close graph store cleanly: {}", e);
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, stats);
    }

    Ok(report)
}

fn exit_code(report: &BatchReport) -> ExitCode {
    match report.abort {
        Some(AbortReason::ConnectionLost { .. }) => ExitCode::from(2),
        _ if report.is_clean() => ExitCode::SUCCESS,
        _ => ExitCode::from(1),
    }
}

fn print_summary(report: &BatchReport, stats: Option<GraphStats>) {
    println!(
        "Batch {}: {} rows ({} succeeded, {} failed, {} skipped, {} retries)",
        report.batch_id,
        report.rows_total(),
        report.rows_succeeded,
        report.rows_failed,
        report.rows_skipped,
        report.retries
    );
    println!(
        "Nodes: {} created, {} reused ({} attributes filled)",
        report.nodes_created, report.nodes_reused, report.attributes_filled
    );
    println!(
        "Edges: {} created, {} reused",
        report.edges_created, report.edges_reused
    );
    if let Some(stats) = stats {
        println!("Store: {} nodes, {} edges", stats.nodes, stats.edges);
    }

    for failure in &report.failures {
        println!("line {}: {}: {}", failure.line, failure.kind, failure.message);
    }

    match &report.abort {
        Some(AbortReason::ConnectionLost { consecutive }) => println!(
            "Aborted: store connection lost on {} consecutive rows",
            consecutive
        ),
        Some(AbortReason::StopOnError { line }) => {
            println!("Aborted: stop-on-error after line {}", line)
        }
        Some(AbortReason::Cancelled) => println!("Cancelled"),
        None => {}
    }
}
