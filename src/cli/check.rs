//! Offline policy evaluation. Nothing here talks to the cloud APIs.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::policy::{self, BindingDelta, DeltaAction, FirewallSnapshot, ViolationResult};

#[derive(Args)]
pub struct CheckArgs {
    #[command(subcommand)]
    pub command: CheckCommands,
}

#[derive(Subcommand)]
pub enum CheckCommands {
    /// Evaluate a firewall rule resource (JSON as returned by the Compute API)
    Firewall {
        /// Path to the rule JSON
        rule: PathBuf,
    },

    /// Evaluate adding members to a bucket's IAM policy
    Bucket {
        /// Bucket name
        name: String,

        /// Member being granted access (repeatable)
        #[arg(long = "add-member", required = true)]
        add_member: Vec<String>,

        /// Role being granted
        #[arg(long, default_value = "roles/storage.objectViewer")]
        role: String,
    },
}

pub fn run(args: CheckArgs, config: &Config) -> Result<()> {
    let whitelist = config.whitelist_store()?;

    let verdict = match args.command {
        CheckCommands::Firewall { rule } => {
            let raw = std::fs::read_to_string(&rule)
                .with_context(|| format!("Failed to read {}", rule.display()))?;
            let snapshot: FirewallSnapshot =
                serde_json::from_str(&raw).context("Not a firewall rule resource")?;
            policy::firewall::evaluate(&snapshot, &whitelist.firewall)
        }
        CheckCommands::Bucket {
            name,
            add_member,
            role,
        } => {
            let deltas = additions(&add_member, &role);
            policy::bucket::evaluate(&name, &deltas, &whitelist)
        }
    };

    print_verdict(&verdict)
}

fn additions(members: &[String], role: &str) -> Vec<BindingDelta> {
    members
        .iter()
        .map(|member| BindingDelta {
            action: DeltaAction::Add,
            member: member.clone(),
            role: Some(role.to_string()),
        })
        .collect()
}

fn print_verdict(verdict: &ViolationResult) -> Result<()> {
    if verdict.is_violation {
        println!("VIOLATION: {}", verdict.reason);
    } else {
        println!("compliant: {}", verdict.reason);
    }
    println!("{}", serde_json::to_string_pretty(verdict)?);
    Ok(())
}
