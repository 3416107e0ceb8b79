use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::dispatch::{Dispatcher, Outcome, ResourceKind};
use crate::event::{Envelope, PushRequest};

#[derive(Args)]
pub struct ProcessArgs {
    /// File holding the message (`{"data": ...}` or a full push body); `-` reads stdin
    pub input: PathBuf,

    /// Only handle events of this kind
    #[arg(short, long)]
    pub kind: Option<KindArg>,

    /// Exit non-zero when the outcome is a failure
    #[arg(long)]
    pub strict: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    Firewall,
    Bucket,
}

impl From<KindArg> for ResourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Firewall => ResourceKind::Firewall,
            KindArg::Bucket => ResourceKind::Bucket,
        }
    }
}

pub async fn run(args: ProcessArgs, config: &Config) -> Result<()> {
    let raw = read_input(&args.input)?;
    let envelope = parse_envelope(&raw)?;

    let dispatcher = Dispatcher::from_config(config)?;
    let outcome = dispatcher
        .dispatch(&envelope, args.kind.map(ResourceKind::from))
        .await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if args.strict && matches!(outcome, Outcome::Failed { .. }) {
        anyhow::bail!("Invocation failed");
    }
    Ok(())
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Accept either a bare Pub/Sub message or a push request wrapping one.
fn parse_envelope(raw: &str) -> Result<Envelope> {
    let value: serde_json::Value = serde_json::from_str(raw).context("Input is not JSON")?;
    if value.get("message").is_some() {
        let request: PushRequest = serde_json::from_value(value)?;
        return Ok(request.message);
    }
    Ok(serde_json::from_value(value)?)
}
