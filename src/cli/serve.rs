use anyhow::Result;
use clap::Args;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::server::Server;

#[derive(Args)]
pub struct ServeArgs {
    /// Address to bind (overrides config)
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on (overrides config and $PORT)
    #[arg(short, long)]
    pub port: Option<u16>,
}

pub async fn run(args: ServeArgs, config: &Config) -> Result<()> {
    let mut server_config = config.server.clone();
    if let Some(bind) = args.bind {
        server_config.bind = bind;
    }
    if let Some(port) = args.port {
        server_config.port = port;
    }

    let dispatcher = Dispatcher::from_config(config)?;
    Server::new(&server_config, dispatcher).run().await
}
