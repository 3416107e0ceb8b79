//! Revert actions for detected violations.
//!
//! Both remediators are idempotent: reverting a resource that is already
//! compliant (rule already deleted, no public bindings left) succeeds with
//! [`RevertOutcome::AlreadyCompliant`] instead of failing, so redelivered
//! events are harmless.

pub mod bucket;
pub mod firewall;

pub use bucket::BucketRemediator;
pub use firewall::FirewallRemediator;

use serde::Serialize;
use std::time::Duration;

use crate::cloud::ApiError;
use crate::config::RemediationConfig;
use crate::error::GuardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevertOutcome {
    Reverted,
    AlreadyCompliant,
}

/// Poll cadence and deadline for asynchronous revert operations.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl From<&RemediationConfig> for PollSettings {
    fn from(config: &RemediationConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            timeout: Duration::from_secs(config.poll_timeout_secs),
        }
    }
}

/// Classify a failed revert call. Permanent 4xx rejections are kept apart
/// so the delivery is acked instead of redelivered into the same refusal.
fn revert_error(resource: &str, err: ApiError) -> GuardError {
    match err.status() {
        Some(status) if err.is_permanent_rejection() => GuardError::RevertRejected {
            resource: resource.to_string(),
            status,
            detail: err.to_string(),
        },
        _ => GuardError::RevertRequest {
            resource: resource.to_string(),
            detail: err.to_string(),
        },
    }
}
