//! Pure violation detection. Nothing in here performs I/O.

pub mod bucket;
pub mod firewall;
pub mod port;
pub mod whitelist;

pub use bucket::{Binding, BindingDelta, BucketPolicy, DeltaAction};
pub use firewall::{AllowedRule, Direction, FirewallSnapshot};
pub use port::PortSpec;
pub use whitelist::{FirewallWhitelistEntry, WhitelistStore};

use serde::Serialize;

/// Outcome of evaluating one resource against the whitelist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolationResult {
    pub is_violation: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub offending_ranges: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub offending_bindings: Vec<BindingDelta>,
    pub reason: String,
}

impl ViolationResult {
    pub fn compliant(reason: impl Into<String>) -> Self {
        Self {
            is_violation: false,
            offending_ranges: Vec::new(),
            offending_bindings: Vec::new(),
            reason: reason.into(),
        }
    }

    pub fn firewall_violation(range: &str, reason: impl Into<String>) -> Self {
        Self {
            is_violation: true,
            offending_ranges: vec![range.to_string()],
            offending_bindings: Vec::new(),
            reason: reason.into(),
        }
    }

    pub fn bucket_violation(bindings: Vec<BindingDelta>, reason: impl Into<String>) -> Self {
        Self {
            is_violation: true,
            offending_ranges: Vec::new(),
            offending_bindings: bindings,
            reason: reason.into(),
        }
    }
}
