//! CLI argument parsing using clap 4.x derive macros

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Reverse-auction clearing and SLA-bonded settlement daemon
#[derive(Parser, Debug)]
#[command(name = "clearhouse")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (defaults to ./clearhouse.toml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for persisted intents, bids, contracts and jobs
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. "info", "clearhouse_core=debug")
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the clearing daemon until interrupted (the default)
    Serve,

    /// Inspect or write the configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as JSON
    Show,

    /// Write the effective configuration to a file
    Init {
        /// Destination (defaults to the user config dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
