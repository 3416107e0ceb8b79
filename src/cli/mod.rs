pub mod check;
pub mod config;
pub mod process;
pub mod serve;
pub mod whitelist;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "guardrail")]
#[command(
    author,
    version,
    about = "Automatically reverts firewall rules and bucket grants that expose resources publicly"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a TOML config file (environment variables still apply on top)
    #[arg(short, long, global = true, env = "GUARDRAIL_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the Pub/Sub push endpoints
    Serve(serve::ServeArgs),

    /// Process a single Pub/Sub message against the live APIs
    Process(process::ProcessArgs),

    /// Evaluate a resource against the whitelist without touching it
    Check(check::CheckArgs),

    /// Show the parsed whitelist
    Whitelist,

    /// Configuration inspection
    Config(config::ConfigArgs),
}
