//! Public-access checks for storage bucket IAM changes.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ViolationResult;
use super::whitelist::WhitelistStore;

/// Identities that make a bucket readable by anyone.
pub const PUBLIC_MEMBERS: &[&str] = &["allUsers", "allAuthenticatedUsers"];

pub fn is_public_member(member: &str) -> bool {
    PUBLIC_MEMBERS.contains(&member)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeltaAction {
    Add,
    Remove,
    #[serde(other)]
    Unknown,
}

/// A single add/remove change from `serviceData.policyDelta.bindingDeltas`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingDelta {
    pub action: DeltaAction,
    pub member: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl BindingDelta {
    pub fn grants_public_access(&self) -> bool {
        self.action == DeltaAction::Add && is_public_member(&self.member)
    }
}

/// One role binding of a live bucket IAM policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Binding {
    pub fn is_public(&self) -> bool {
        self.members.iter().any(|m| is_public_member(m))
    }
}

/// Live bucket IAM policy. `etag` is the optimistic-concurrency token sent
/// back on write; unknown fields round-trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketPolicy {
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BucketPolicy {
    /// Drop every binding that includes a public member. Returns the
    /// removed bindings; empty when the policy was already private.
    pub fn remove_public_bindings(&mut self) -> Vec<Binding> {
        let (public, private): (Vec<Binding>, Vec<Binding>) =
            self.bindings.drain(..).partition(Binding::is_public);
        self.bindings = private;
        public
    }
}

/// Evaluate the binding deltas of one IAM change.
///
/// Whitelisted buckets are always compliant. Otherwise any added public
/// member is a violation; removals are never flagged.
pub fn evaluate(bucket: &str, deltas: &[BindingDelta], whitelist: &WhitelistStore) -> ViolationResult {
    if whitelist.is_bucket_whitelisted(bucket) {
        info!("Bucket {} is in the whitelist. Skip...", bucket);
        return ViolationResult::compliant("bucket is whitelisted");
    }

    let offending: Vec<BindingDelta> = deltas
        .iter()
        .filter(|d| d.grants_public_access())
        .cloned()
        .collect();

    if offending.is_empty() {
        debug!("No public grants added to bucket {}", bucket);
        return ViolationResult::compliant("no public members added");
    }

    info!(
        "Total violations for bucket {}: {}",
        bucket,
        offending.len()
    );
    let members: Vec<&str> = offending.iter().map(|d| d.member.as_str()).collect();
    let reason = format!(
        "bucket {} granted access to {}",
        bucket,
        members.join(", ")
    );
    ViolationResult::bucket_violation(offending, reason)
}
