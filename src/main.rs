use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use guardrail::cli::{self, Cli, Commands};
use guardrail::config::{Config, LoggingConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Serve(args) => cli::serve::run(args, &config).await,
        Commands::Process(args) => cli::process::run(args, &config).await,
        Commands::Check(args) => cli::check::run(args, &config),
        Commands::Whitelist => cli::whitelist::run(&config),
        Commands::Config(args) => cli::config::run(args, &config),
    }
}

/// `RUST_LOG` wins over `--verbose`, which wins over the configured level.
fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let log_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().with_current_span(true).init();
    } else {
        builder.init();
    }
}
