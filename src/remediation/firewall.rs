use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::{PollSettings, RevertOutcome, revert_error};
use crate::cloud::{DeleteOutcome, FirewallApi, OperationStatus, RemediationOperation};
use crate::error::{GuardError, Result};

/// Deletes offending firewall rules and waits for the deletion to finish.
pub struct FirewallRemediator {
    api: Arc<dyn FirewallApi>,
    poll: PollSettings,
}

impl FirewallRemediator {
    pub fn new(api: Arc<dyn FirewallApi>, poll: PollSettings) -> Self {
        Self { api, poll }
    }

    /// Delete `name` and block until the delete operation is terminal.
    ///
    /// A rule that is already gone counts as reverted. Waiting is bounded
    /// by [`PollSettings::timeout`]; dropping the returned future cancels
    /// the wait.
    pub async fn revert(&self, name: &str) -> Result<RevertOutcome> {
        let operation = match self.api.delete_firewall(name).await {
            Ok(DeleteOutcome::Started(op)) => op,
            Ok(DeleteOutcome::AlreadyGone) => {
                info!("Firewall rule {} is already deleted", name);
                return Ok(RevertOutcome::AlreadyCompliant);
            }
            Err(e) => return Err(revert_error(name, e)),
        };

        info!(
            "Waiting for operation {} to delete firewall rule {}",
            operation.operation_id, name
        );
        match timeout(self.poll.timeout, self.wait_for_operation(name, operation)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GuardError::RemediationTimeout {
                    resource: name.to_string(),
                    timeout: self.poll.timeout,
                });
            }
        }

        info!("Firewall rule {} has been deleted", name);
        Ok(RevertOutcome::Reverted)
    }

    /// PENDING -> DONE | ERROR. Status lookups that fail are retried on the
    /// next tick; the caller's deadline bounds the loop.
    async fn wait_for_operation(&self, name: &str, mut operation: RemediationOperation) -> Result<()> {
        loop {
            match operation.status {
                OperationStatus::Done => return Ok(()),
                OperationStatus::Error(detail) => {
                    return Err(GuardError::RemediationFailed {
                        resource: name.to_string(),
                        detail,
                    });
                }
                OperationStatus::Pending => {}
            }

            sleep(self.poll.interval).await;

            match self.api.get_operation(&operation.operation_id).await {
                Ok(next) => {
                    debug!("Operation {} status: {:?}", next.operation_id, next.status);
                    operation = next;
                }
                Err(e) => {
                    warn!(
                        "Failed to poll operation {}: {}",
                        operation.operation_id, e
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{ApiError, MockFirewallApi};
    use crate::error::ErrorKind;
    use mockall::Sequence;
    use serde_json::json;
    use std::time::Duration;

    fn op(status: OperationStatus) -> RemediationOperation {
        RemediationOperation {
            operation_id: "operation-1".to_string(),
            status,
        }
    }

    fn fast_poll() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    fn expect_statuses(api: &mut MockFirewallApi, statuses: Vec<OperationStatus>) {
        let mut seq = Sequence::new();
        for status in statuses {
            api.expect_get_operation()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| Ok(op(status.clone())));
        }
    }

    #[tokio::test]
    async fn polls_until_done() {
        let mut api = MockFirewallApi::new();
        api.expect_delete_firewall()
            .withf(|name| name == "allow-all")
            .times(1)
            .returning(|_| Ok(DeleteOutcome::Started(op(OperationStatus::Pending))));
        expect_statuses(
            &mut api,
            vec![
                OperationStatus::Pending,
                OperationStatus::Pending,
                OperationStatus::Done,
            ],
        );

        let remediator = FirewallRemediator::new(Arc::new(api), fast_poll());
        let outcome = remediator.revert("allow-all").await.unwrap();
        assert_eq!(outcome, RevertOutcome::Reverted);
    }

    #[tokio::test]
    async fn error_status_fails_with_upstream_detail() {
        let mut api = MockFirewallApi::new();
        api.expect_delete_firewall()
            .returning(|_| Ok(DeleteOutcome::Started(op(OperationStatus::Pending))));
        expect_statuses(
            &mut api,
            vec![
                OperationStatus::Pending,
                OperationStatus::Error(json!({"errors": [{"code": "RESOURCE_IN_USE"}]})),
            ],
        );

        let remediator = FirewallRemediator::new(Arc::new(api), fast_poll());
        match remediator.revert("allow-all").await {
            Err(GuardError::RemediationFailed { resource, detail }) => {
                assert_eq!(resource, "allow-all");
                assert_eq!(detail["errors"][0]["code"], "RESOURCE_IN_USE");
            }
            other => panic!("Expected RemediationFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn already_deleted_rule_is_a_no_op() {
        let mut api = MockFirewallApi::new();
        api.expect_delete_firewall()
            .times(2)
            .returning(|_| Ok(DeleteOutcome::AlreadyGone));
        api.expect_get_operation().never();

        let remediator = FirewallRemediator::new(Arc::new(api), fast_poll());
        for _ in 0..2 {
            assert_eq!(
                remediator.revert("allow-all").await.unwrap(),
                RevertOutcome::AlreadyCompliant
            );
        }
    }

    #[tokio::test]
    async fn forbidden_delete_is_rejected() {
        let mut api = MockFirewallApi::new();
        api.expect_delete_firewall().returning(|_| {
            Err(ApiError::Status {
                status: 403,
                body: "permission denied".to_string(),
            })
        });
        api.expect_get_operation().never();

        let remediator = FirewallRemediator::new(Arc::new(api), fast_poll());
        let err = remediator.revert("allow-all").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RevertRejected);
        assert!(!err.kind().is_retryable());
    }

    #[tokio::test]
    async fn unavailable_delete_is_a_revert_request_error() {
        let mut api = MockFirewallApi::new();
        api.expect_delete_firewall().returning(|_| {
            Err(ApiError::Status {
                status: 503,
                body: "backend error".to_string(),
            })
        });

        let remediator = FirewallRemediator::new(Arc::new(api), fast_poll());
        let err = remediator.revert("allow-all").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RevertRequest);
        assert!(err.kind().is_retryable());
    }

    #[tokio::test]
    async fn endless_pending_times_out() {
        let mut api = MockFirewallApi::new();
        api.expect_delete_firewall()
            .returning(|_| Ok(DeleteOutcome::Started(op(OperationStatus::Pending))));
        api.expect_get_operation()
            .returning(|_| Ok(op(OperationStatus::Pending)));

        let poll = PollSettings {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(30),
        };
        let remediator = FirewallRemediator::new(Arc::new(api), poll);
        let err = remediator.revert("allow-all").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemediationTimeout);
    }

    #[tokio::test]
    async fn transient_poll_failure_is_retried() {
        let mut api = MockFirewallApi::new();
        api.expect_delete_firewall()
            .returning(|_| Ok(DeleteOutcome::Started(op(OperationStatus::Pending))));
        let mut seq = Sequence::new();
        api.expect_get_operation()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ApiError::Decode("truncated body".to_string())));
        api.expect_get_operation()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(op(OperationStatus::Done)));

        let remediator = FirewallRemediator::new(Arc::new(api), fast_poll());
        assert_eq!(
            remediator.revert("allow-all").await.unwrap(),
            RevertOutcome::Reverted
        );
    }
}
