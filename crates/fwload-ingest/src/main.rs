//! fwload - Fixed-width file loader

use anyhow::{Context, Result};
use clap::Parser;
use fwload_common::logging::{init_logging, LogConfig, LogLevel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fwload_ingest::{
    config::IngestConfig, DirectorySpecSource, DispatchSummary, IngestWorker, JobDispatcher,
    MemoryTableStore, PgTableStore, SchemaResolver, TableStore,
};

#[derive(Parser, Debug)]
#[command(name = "fwload")]
#[command(author, version, about = "Bulk load fixed-width data files into PostgreSQL")]
struct Cli {
    /// Directory containing data files
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Directory containing one spec file per model
    #[arg(short, long)]
    spec_dir: Option<PathBuf>,

    /// Rows per transaction
    #[arg(short, long)]
    buffer_size: Option<usize>,

    /// Number of concurrent workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Decode and batch without a database
    #[arg(long)]
    dry_run: bool,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("fwload")
        .filter_directives("sqlx=warn")
        .build()
        .merge_env()
        .context("Invalid logging configuration")?;

    let _log_guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(dir) = cli.spec_dir {
        config.spec_dir = dir;
    }
    if let Some(size) = cli.buffer_size {
        config.buffer_size = size;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate()?;

    info!(
        data_dir = %config.data_dir.display(),
        spec_dir = %config.spec_dir.display(),
        buffer_size = config.buffer_size,
        workers = config.workers,
        dry_run = cli.dry_run,
        "Starting fwload"
    );

    let store: Arc<dyn TableStore> = if cli.dry_run {
        info!("Dry run, rows are kept in memory");
        Arc::new(MemoryTableStore::new())
    } else {
        Arc::new(
            PgTableStore::connect(&config.database)
                .await
                .context("Failed to connect to database")?,
        )
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let resolver = Arc::new(SchemaResolver::new(Arc::new(DirectorySpecSource::new(
        &config.spec_dir,
        &config.spec_extension,
    ))));
    let worker = IngestWorker::new(resolver, store, config.buffer_size, cancel.clone());
    let dispatcher = JobDispatcher::new(worker, config.workers, cancel);

    let summary = dispatcher
        .run_dir(&config.data_dir, &config.file_suffix)
        .await
        .context("Dispatch failed")?;

    log_summary(&summary);

    if let Some(path) = cli.report {
        write_report(&path, &summary).await?;
        info!(path = %path.display(), "Report written");
    }

    Ok(())
}

fn log_summary(summary: &DispatchSummary) {
    for report in &summary.reports {
        if let Some(err) = &report.error {
            warn!(
                path = %report.path.display(),
                state = %report.state,
                rows_committed = report.rows_committed,
                "{}",
                err
            );
        }
    }

    info!(
        "Load complete: {} submitted, {} completed, {} failed, {} cancelled, {} rows committed",
        summary.submitted,
        summary.completed,
        summary.failed,
        summary.cancelled,
        summary.rows_committed
    );
}

async fn write_report(path: &Path, summary: &DispatchSummary) -> Result<()> {
    let json = serde_json::to_vec_pretty(summary).context("Failed to serialize report")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing in-flight batches");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing in-flight batches");
        },
    }

    token.cancel();
}
