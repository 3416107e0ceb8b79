//! Guardrail - automatic remediation of public-exposure policy violations
//!
//! This crate provides:
//! - Decoding of audit-log notifications delivered through Pub/Sub
//! - Whitelist-driven evaluation of firewall rules and bucket IAM changes
//! - Remediation (rule deletion, public binding removal) with bounded waits
//! - Best-effort email alerts
//! - A push-endpoint HTTP server and a CLI for one-off processing

pub mod cli;
pub mod cloud;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod notify;
pub mod policy;
pub mod remediation;
pub mod server;

pub use config::Config;
pub use dispatch::{Dispatcher, Outcome};
pub use error::{ErrorKind, GuardError};
