//! tgarc binary.
//!
//! Reads configuration from flags and the environment, wires the Telegram
//! source to the ClickHouse sink and runs the ingestion pipeline until
//! SIGINT/SIGTERM or a fatal error. A nonzero exit status means the run failed
//! and can simply be restarted: ingestion resumes from the stored watermarks.

#![forbid(unsafe_code)]

mod args;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tgarc_clickhouse::ClickHouseSink;
use tgarc_core::{Pipeline, RunReport};
use tgarc_telegram::TelegramSource;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::args::Args;

fn init_tracing(log_level: &str, json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level '{log_level}'"))?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .try_init()
        .context("failed to install tracing subscriber")
}

/// Resolve once SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}

async fn run(args: Args) -> anyhow::Result<RunReport> {
    let ingest = args.ingest_config();

    let sink = ClickHouseSink::new(args.clickhouse_config()).context("invalid ClickHouse settings")?;
    let source =
        TelegramSource::new(args.telegram_config()).context("failed to set up Telegram client")?;

    info!(
        channels = ingest.channels.len(),
        table = %sink.config().qualified_table(),
        lookback_days = args.lookback_days,
        store_empty = ingest.store_empty,
        resolution_policy = %ingest.resolution_policy,
        "Starting tgarc"
    );

    let mut pipeline =
        Pipeline::new(ingest, source, sink).context("invalid ingestion settings")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    pipeline.run(shutdown_rx).await.context("ingestion stopped")
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(&args.log_level, args.log_json) {
        eprintln!("tgarc: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(report) => {
            info!(
                channels = report.channels.len(),
                skipped = report.skipped_handles.len(),
                backfilled = report.backfilled_rows(),
                live = report.live.written,
                stop_reason = ?report.stop_reason,
                "tgarc finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "tgarc failed");
            eprintln!("tgarc: {e:#}");
            ExitCode::FAILURE
        }
    }
}
