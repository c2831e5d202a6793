//! Drover - device resource allocation and task execution engine
//!
//! CLI entry point.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result, bail};
use serde_json::json;
use tracing::info;

use drover::bridge::{AdbBridge, probe_fleet};
use drover::cli::{Cli, Command};
use drover::config::Config;
use drover::domain::{Task, TaskAction};
use drover::engine::Engine;
use drover::store::TaskStore;

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drover")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to the log file, not stdout/stderr; CLI output stays clean
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("drover.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Serve => cmd_serve(config).await,
        Command::Submit { action, keyword, swipe_count, filters } => {
            cmd_submit(&config, &action, &keyword, swipe_count, &filters).await
        }
        Command::Status => cmd_status(&config).await,
        Command::Devices => cmd_devices(&config).await,
    }
}

async fn cmd_serve(config: Config) -> Result<()> {
    println!("Starting drover with {} endpoint(s)...", config.endpoints.len());

    let engine = Engine::new(config)?;
    engine.run().await?;

    println!("Drover stopped.");
    Ok(())
}

async fn cmd_submit(
    config: &Config,
    action: &str,
    keyword: &str,
    swipe_count: u32,
    filters: &[String],
) -> Result<()> {
    let mut filter_map = BTreeMap::new();
    for entry in filters {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("Invalid filter '{}', expected KEY=VALUE", entry);
        };
        filter_map.insert(key.to_string(), value.to_string());
    }

    let mut parameters = json!({
        "keyword": keyword,
        "swipe_count": swipe_count,
    });
    if !filter_map.is_empty() {
        parameters["filters"] = serde_json::to_value(&filter_map)?;
    }

    // Reject malformed tasks here instead of burning a worker's retry budget
    TaskAction::parse(action, &parameters).context("Invalid task")?;

    let store = TaskStore::open(&config.storage.db_path)?;
    let task = Task::new(action, parameters);
    let id = store.create(task).await?;
    store.shutdown().await?;

    println!("Submitted task {id}");
    Ok(())
}

async fn cmd_status(config: &Config) -> Result<()> {
    let store = TaskStore::open(&config.storage.db_path)?;
    let counts = store.counts().await?;
    store.shutdown().await?;

    println!("Tasks ({} total):", counts.total());
    println!("  pending:    {}", counts.pending);
    println!("  queued:     {}", counts.queued);
    println!("  processing: {}", counts.processing);
    println!("  completed:  {}", counts.completed);
    println!("  failed:     {}", counts.failed);
    println!("  abandoned:  {}", counts.abandoned);
    println!();
    println!("Endpoint health and busy state live in the serve process; see its log.");
    Ok(())
}

async fn cmd_devices(config: &Config) -> Result<()> {
    let bridge = AdbBridge::new(&config.bridge);
    let devices = probe_fleet(&bridge).await?;

    if devices.is_empty() {
        println!("No verified devices online.");
    } else {
        println!("Verified devices:");
        for serial in devices {
            println!("  {serial}");
        }
    }
    Ok(())
}
