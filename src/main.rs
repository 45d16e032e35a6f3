#![forbid(unsafe_code)]

//! `confsnap`: snapshot and restore remote configuration from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use confsnap::orchestrator::retention::spawn_retention_task;
use confsnap::orchestrator::snapshot_manager::{
    prompt_for_approval, AutoApprove, PreviewGate, RestoreOptions, RestoreOutcome,
    RestorePreview,
};
use confsnap::{AppConfig, AppError, Result, SnapshotManager};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "confsnap", about = "Snapshot and restore remote configuration", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "confsnap.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print results as JSON instead of text.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture the live configuration of a target.
    Create {
        /// Target identifier.
        target: String,
        /// Free-text description stored with the snapshot.
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// List snapshots of a target, newest first.
    List {
        /// Target identifier.
        target: String,
    },
    /// Restore a snapshot onto the live configuration.
    Restore {
        /// Target identifier.
        target: String,
        /// Snapshot identifier.
        snapshot_id: String,
        /// Apply without asking for confirmation.
        #[arg(long)]
        yes: bool,
        /// Skip the diff preview entirely.
        #[arg(long)]
        force: bool,
        /// Do not capture a safety snapshot first.
        #[arg(long)]
        skip_safety_backup: bool,
    },
    /// Delete snapshots older than the retention window.
    Prune {
        /// Targets to prune.
        #[arg(required = true)]
        targets: Vec<String>,
        /// Override the configured retention window.
        #[arg(long)]
        max_age_days: Option<u32>,
        /// Keep running and prune on the configured interval until interrupted.
        #[arg(long)]
        watch: bool,
    },
    /// Show restore history of a target, newest first.
    History {
        /// Target identifier.
        target: String,
        /// Maximum number of records.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Compare the snapshot catalogue with the stored blobs.
    Check {
        /// Target identifier.
        target: String,
        /// Delete orphan blobs older than the grace period.
        #[arg(long)]
        sweep: bool,
        /// Rebuild the catalogue from the stored blobs first.
        #[arg(long)]
        rebuild: bool,
    },
}

/// Asks on the terminal before a previewed restore is applied.
struct ConfirmOnTerminal;

impl PreviewGate for ConfirmOnTerminal {
    fn approve(&self, preview: &RestorePreview) -> bool {
        prompt_for_approval(
            preview,
            &mut std::io::stdin().lock(),
            &mut std::io::stderr().lock(),
        )
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

#[allow(clippy::too_many_lines)] // One arm per subcommand.
async fn run(args: Cli) -> Result<()> {
    let config = AppConfig::load_from_path(&args.config)?;
    info!(store_dir = %config.store_dir.display(), "configuration loaded");
    let json = args.json;

    match args.command {
        Command::Create {
            target,
            description,
        } => {
            let manager = SnapshotManager::from_config(&config)?;
            let summary = manager.create_snapshot(&target, &description).await?;
            emit(json, &summary, || format!("created snapshot {}", summary.id))
        }
        Command::List { target } => {
            let manager = SnapshotManager::from_config(&config)?;
            let entries = manager.list_snapshots(&target).await?;
            emit(json, &entries, || {
                entries
                    .iter()
                    .map(|e| format!("{}  {:?}  {}", e.id, e.kind, e.description))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Command::Restore {
            target,
            snapshot_id,
            yes,
            force,
            skip_safety_backup,
        } => {
            let gate: Arc<dyn PreviewGate> = if yes {
                Arc::new(AutoApprove)
            } else {
                Arc::new(ConfirmOnTerminal)
            };
            let manager = SnapshotManager::from_config(&config)?.with_preview_gate(gate);
            let options = RestoreOptions {
                force_without_preview: force,
                skip_safety_backup,
            };
            let outcome = manager.restore(&target, &snapshot_id, options).await?;
            emit(json, &outcome, || match &outcome {
                RestoreOutcome::Declined(_) => "restore declined; nothing applied".to_owned(),
                RestoreOutcome::Applied(applied) => {
                    let mut text = format!("restored {} ({:?})", applied.snapshot_id, applied.outcome);
                    if let Some(safety) = &applied.safety_snapshot {
                        text.push_str(&format!("\nsafety snapshot: {}", safety.id));
                    }
                    for mismatch in &applied.validation.mismatches {
                        text.push_str(&format!("\nmismatch: {}", mismatch.field));
                    }
                    text
                }
            })
        }
        Command::Prune {
            targets,
            max_age_days,
            watch,
        } => {
            let manager = SnapshotManager::from_config(&config)?;
            let max_age_days = max_age_days.unwrap_or(config.retention_days);
            if watch {
                let ct = CancellationToken::new();
                let handle = spawn_retention_task(
                    Arc::new(manager.retention()),
                    targets,
                    max_age_days,
                    config.prune_interval(),
                    ct.clone(),
                );
                shutdown_signal().await;
                info!("shutdown signal received");
                ct.cancel();
                let _ = handle.await;
                return Ok(());
            }
            for target in targets {
                let result = manager.prune(&target, max_age_days).await?;
                emit(json, &result, || {
                    format!(
                        "{target}: deleted {}, retained {}, failed {}",
                        result.deleted_ids.len(),
                        result.retained_count,
                        result.failures.len()
                    )
                })?;
            }
            Ok(())
        }
        Command::History { target, limit } => {
            let manager = SnapshotManager::from_config(&config)?;
            let records = manager.list_history(&target, limit).await?;
            emit(json, &records, || {
                records
                    .iter()
                    .map(|r| {
                        format!(
                            "{}  {}  {:?}  {}",
                            r.timestamp.to_rfc3339(),
                            r.snapshot_id,
                            r.outcome,
                            r.details
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Command::Check {
            target,
            sweep,
            rebuild,
        } => {
            let manager = SnapshotManager::from_config(&config)?;
            if rebuild {
                let count = manager.rebuild_index(&target).await?;
                info!(target_id = %target, entries = count, "catalogue rebuilt");
            }
            let report = manager.check_consistency(&target).await?;
            emit(json, &report, || {
                format!(
                    "catalogue readable: {}\ndangling entries: {:?}\norphan blobs: {:?}",
                    report.catalogue_readable, report.dangling_entries, report.orphan_blobs
                )
            })?;
            if sweep {
                let swept = manager.sweep_orphans(&target).await?;
                emit(json, &swept, || format!("swept {} orphan blob(s)", swept.len()))?;
            }
            Ok(())
        }
    }
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    let rendered = if json {
        serde_json::to_string_pretty(value)?
    } else {
        text()
    };
    println!("{rendered}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
