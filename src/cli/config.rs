use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::Config;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration (file plus environment)
    Show {
        /// Output format: toml (default) or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Get a configuration value
    Get {
        /// Config key (e.g., remediation.poll_timeout_secs)
        key: String,
    },
}

pub fn run(args: ConfigArgs, config: &Config) -> Result<()> {
    match args.command {
        ConfigCommands::Show { format } => show_config(config, &format),
        ConfigCommands::Get { key } => {
            println!("{}", config.get_value(&key)?);
            Ok(())
        }
    }
}

fn show_config(config: &Config, format: &str) -> Result<()> {
    // Never print the bearer token.
    let mut shown = config.clone();
    if shown.api.access_token.is_some() {
        shown.api.access_token = Some("********".to_string());
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&shown)?),
        _ => println!("{}", toml::to_string_pretty(&shown)?),
    }
    Ok(())
}
