//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Drover - device allocation and task execution engine
#[derive(Parser)]
#[command(
    name = "drover",
    about = "Drives a fleet of emulator devices through keyword search tasks",
    version,
    after_help = "Logs are written to: ~/.local/share/drover/logs/drover.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the engine in the foreground until ctrl-c
    Serve,

    /// Create a task in the store
    Submit {
        /// Action to run (search_notes, search_products)
        #[arg(long)]
        action: String,

        /// Search keyword
        #[arg(long)]
        keyword: String,

        /// Screenfuls to scroll through while collecting
        #[arg(long, default_value = "10")]
        swipe_count: u32,

        /// UI filter as key=value (repeatable, search_notes only)
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,
    },

    /// Show per-status task counts
    Status,

    /// Probe and list verified devices
    Devices,
}
