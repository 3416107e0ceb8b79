use std::sync::Arc;
use tracing::{info, warn};

use super::{RevertOutcome, revert_error};
use crate::cloud::BucketApi;
use crate::error::{GuardError, Result};

/// Strips public bindings from a bucket's live IAM policy.
pub struct BucketRemediator {
    api: Arc<dyn BucketApi>,
    max_attempts: u32,
}

impl BucketRemediator {
    pub fn new(api: Arc<dyn BucketApi>, max_attempts: u32) -> Self {
        Self {
            api,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Read the current policy, drop every binding that contains a public
    /// member, and write it back guarded by the policy etag. A lost race
    /// restarts the read-modify-write, up to `max_attempts` times.
    pub async fn revert(&self, bucket: &str) -> Result<RevertOutcome> {
        for attempt in 1..=self.max_attempts {
            let mut policy = match self.api.get_iam_policy(bucket).await {
                Ok(Some(policy)) => policy,
                Ok(None) => {
                    info!("Bucket {} no longer exists", bucket);
                    return Ok(RevertOutcome::AlreadyCompliant);
                }
                Err(e) => {
                    return Err(GuardError::SnapshotFetch {
                        resource: bucket.to_string(),
                        detail: e.to_string(),
                    });
                }
            };

            let removed = policy.remove_public_bindings();
            if removed.is_empty() {
                info!("Bucket {} has no public bindings", bucket);
                return Ok(RevertOutcome::AlreadyCompliant);
            }
            for binding in &removed {
                info!(
                    "Removing binding {} {:?} from bucket {}",
                    binding.role, binding.members, bucket
                );
            }

            match self.api.set_iam_policy(bucket, &policy).await {
                Ok(()) => {
                    info!(
                        "Bucket {} now has {} policy bindings",
                        bucket,
                        policy.bindings.len()
                    );
                    return Ok(RevertOutcome::Reverted);
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        "IAM policy of bucket {} changed during revert (attempt {}/{})",
                        bucket, attempt, self.max_attempts
                    );
                }
                Err(e) => return Err(revert_error(bucket, e)),
            }
        }

        Err(GuardError::PolicyConflict {
            resource: bucket.to_string(),
            attempts: self.max_attempts,
        })
    }
}
