//! `tagsync`: run reconciliation sweeps for a list of tag fields.
//!
//! ```text
//! tagsync --config fields.yaml            # one pass
//! tagsync --config fields.yaml --interval 300
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tagsync_core::logging::subsystem;
use tagsync_core::DocumentStore;
use tagsync_jobs::{SchedulerConfig, SchedulerHandle, SweepScheduler};
use tagsync_store::HttpStore;

use crate::config::FieldDefinition;

const USAGE: &str = "usage: tagsync [--config <file>] [--interval <secs> | --once]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    interval: Option<Duration>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut result = Args::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config needs a file path")?;
                result.config = Some(PathBuf::from(path));
            }
            "--interval" => {
                let secs: u64 = args
                    .next()
                    .context("--interval needs a number of seconds")?
                    .parse()
                    .context("--interval must be a whole number of seconds")?;
                if secs == 0 {
                    bail!("--interval must be at least 1 second");
                }
                result.interval = Some(Duration::from_secs(secs));
            }
            "--once" => result.interval = None,
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown argument '{other}'\n{USAGE}"),
        }
    }
    Ok(result)
}

/// Run every field's sweep once. Returns the number of failed sweeps.
async fn run_pass(scheduler: &SchedulerHandle, fields: &[FieldDefinition]) -> usize {
    let start = Instant::now();
    let results = futures::future::join_all(
        fields
            .iter()
            .map(|field| scheduler.submit_and_wait(field.sweep_request())),
    )
    .await;

    let mut failed = 0;
    for (field, result) in fields.iter().zip(results) {
        let sweep = field.sweep_request().key();
        match result {
            Ok(outcome) => info!(
                subsystem = subsystem::CLI,
                sweep = %sweep,
                patched = outcome.patched,
                examined = outcome.examined,
                "Field reconciled"
            ),
            Err(e) => {
                failed += 1;
                error!(
                    subsystem = subsystem::CLI,
                    sweep = %sweep,
                    error = %e,
                    "Field reconciliation failed"
                );
            }
        }
    }

    info!(
        subsystem = subsystem::CLI,
        fields = fields.len(),
        failed,
        duration_ms = start.elapsed().as_millis() as u64,
        "Sweep pass complete"
    );
    failed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "tagsync=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tagsync=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("tagsync.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            } else {
                layer = layer.with_ansi(false); // no ANSI in files
            }
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let args = parse_args()?;
    let fields = config::load_fields(args.config.as_deref())
        .context("Failed to load field definitions")?;
    info!(
        subsystem = subsystem::CLI,
        fields = fields.len(),
        interval_secs = args.interval.map(|i| i.as_secs()),
        "Loaded field definitions"
    );

    let store: Arc<dyn DocumentStore> =
        Arc::new(HttpStore::from_env().context("Failed to configure document store")?);
    let scheduler = SweepScheduler::new(store, SchedulerConfig::from_env()).start();

    let failed = loop {
        let failed = run_pass(&scheduler, &fields).await;
        let Some(interval) = args.interval else {
            break failed;
        };
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!(subsystem = subsystem::CLI, "Interrupted, shutting down");
                break 0;
            }
        }
    };

    scheduler.shutdown().await?;
    if failed > 0 {
        bail!("{failed} of {} field sweeps failed", fields.len());
    }
    Ok(())
}
