use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use redsync::config::Config;
use redsync::remote::HttpRemote;
use redsync::sync::{ExcludePatterns, SyncEngine, SyncReport};
use redsync::tree::ROOT;

#[derive(Parser, Debug)]
#[command(name = "redsync")]
#[command(author, version, about = "Two-way file sync against a remote store", long_about = None)]
struct Args {
    /// Config file (defaults to <config dir>/redsync/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one reconciliation pass and print what it did
    Sync {
        /// Remote directory to reconcile
        #[arg(long, default_value = ROOT)]
        dir: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mirror local changes live and reconcile periodically until Ctrl-C
    Watch,
    /// Print the remote API version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path().context("no config directory on this platform, pass --config")?,
    };
    let config = Config::load(&config_path)?;
    init_logging(&config.log_filter)?;

    let remote = HttpRemote::connect(&config)
        .await
        .context("connecting to the remote")?;

    match args.command {
        Command::Version => {
            println!("{}", remote.version().await?);
        }
        Command::Sync { dir, json } => {
            let engine = build_engine(&config, remote)?;
            let report = engine.run_reconciliation(&dir).await?;
            print_report(&report, json)?;
        }
        Command::Watch => {
            let engine = build_engine(&config, remote)?;
            watch(&config, engine).await?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the configured filter.
fn init_logging(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).compact())
        .try_init()?;
    Ok(())
}

fn build_engine(config: &Config, remote: HttpRemote) -> Result<Arc<SyncEngine>> {
    std::fs::create_dir_all(&config.sync_root)
        .with_context(|| format!("creating {}", config.sync_root.display()))?;
    let excludes = ExcludePatterns::with_extra(&config.exclude)?;
    Ok(Arc::new(SyncEngine::new(
        config.sync_root.clone(),
        Arc::new(remote),
        excludes,
    )))
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let applied = &report.applied;
    println!(
        "Reconciled {} in {} ms ({} remote calls)",
        report.directory, report.duration_ms, report.remote_calls
    );
    println!(
        "  pulled: {} files ({} bytes), {} folders",
        applied.files_pulled, applied.bytes_pulled, applied.folders_pulled
    );
    println!(
        "  pushed: {} files, {} folders",
        applied.files_pushed, applied.folders_pushed
    );
    for failure in &applied.failures {
        println!(
            "  failed {} {}: {} ({} below skipped)",
            failure.direction, failure.path, failure.reason, failure.skipped
        );
    }
    for issue in &report.inconsistencies {
        println!("  unresolved: {}{} is a file on one side and a folder on the other", issue.directory, issue.key);
    }
    Ok(())
}

async fn watch(config: &Config, engine: Arc<SyncEngine>) -> Result<()> {
    match engine.run_reconciliation(ROOT).await {
        Ok(report) => info!(applied = report.applied.actions(), "initial pass finished"),
        Err(err) if err.is_fatal() => return Err(err.into()),
        Err(err) => warn!(error = %err, "initial pass failed"),
    }

    let live = engine.start_live_sync(config.debounce())?;

    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping");
                break;
            }
            _ = ticker.tick() => {
                if engine.is_busy() {
                    debug!("previous pass still running, skipping tick");
                    continue;
                }
                if !live.is_running() {
                    error!("live sync task ended unexpectedly");
                }
                let engine = engine.clone();
                tokio::spawn(async move {
                    if let Err(err) = engine.run_reconciliation(ROOT).await {
                        warn!(error = %err, "scheduled pass failed");
                    }
                });
            }
        }
    }

    live.stop();
    Ok(())
}
