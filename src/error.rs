//! Error taxonomy shared by the decoder, remediators and dispatcher.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Stable, serializable classification of a [`GuardError`].
///
/// This is what ends up in a [`crate::dispatch::Outcome::Failed`] and what
/// the push endpoint uses to decide whether a delivery should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedEvent,
    UnrecognizedSchema,
    SnapshotFetch,
    RevertRequest,
    RevertRejected,
    RemediationFailed,
    RemediationTimeout,
    PolicyConflict,
    Delivery,
}

impl ErrorKind {
    /// Whether redelivering the same event could lead to a different result.
    ///
    /// Decode failures and permanent API rejections never fix themselves,
    /// so those messages are acked and dropped. Other remote failures may
    /// succeed next time.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::SnapshotFetch
                | ErrorKind::RevertRequest
                | ErrorKind::RemediationFailed
                | ErrorKind::RemediationTimeout
                | ErrorKind::PolicyConflict
        )
    }
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("unrecognized event schema: {0}")]
    UnrecognizedSchema(String),

    #[error("cannot fetch {resource}: {detail}")]
    SnapshotFetch { resource: String, detail: String },

    #[error("revert request for {resource} failed: {detail}")]
    RevertRequest { resource: String, detail: String },

    /// The API refused the revert outright (permissions, invalid request).
    #[error("revert request for {resource} was rejected with HTTP {status}: {detail}")]
    RevertRejected {
        resource: String,
        status: u16,
        detail: String,
    },

    #[error("remediation of {resource} failed: {detail}")]
    RemediationFailed {
        resource: String,
        detail: serde_json::Value,
    },

    #[error("remediation of {resource} did not complete within {timeout:?}")]
    RemediationTimeout { resource: String, timeout: Duration },

    #[error("IAM policy of {resource} changed concurrently {attempts} times, giving up")]
    PolicyConflict { resource: String, attempts: u32 },

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

impl GuardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardError::MalformedEvent(_) => ErrorKind::MalformedEvent,
            GuardError::UnrecognizedSchema(_) => ErrorKind::UnrecognizedSchema,
            GuardError::SnapshotFetch { .. } => ErrorKind::SnapshotFetch,
            GuardError::RevertRequest { .. } => ErrorKind::RevertRequest,
            GuardError::RevertRejected { .. } => ErrorKind::RevertRejected,
            GuardError::RemediationFailed { .. } => ErrorKind::RemediationFailed,
            GuardError::RemediationTimeout { .. } => ErrorKind::RemediationTimeout,
            GuardError::PolicyConflict { .. } => ErrorKind::PolicyConflict,
            GuardError::Delivery(_) => ErrorKind::Delivery,
        }
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failures_are_not_retryable() {
        assert!(!ErrorKind::MalformedEvent.is_retryable());
        assert!(!ErrorKind::UnrecognizedSchema.is_retryable());
        assert!(ErrorKind::SnapshotFetch.is_retryable());
        assert!(ErrorKind::RemediationTimeout.is_retryable());
    }

    #[test]
    fn rejected_revert_is_not_retryable() {
        assert!(!ErrorKind::RevertRejected.is_retryable());
        assert!(ErrorKind::RevertRequest.is_retryable());

        let err = GuardError::RevertRejected {
            resource: "allow-all".to_string(),
            status: 403,
            detail: "forbidden".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::RevertRejected);
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn remediation_failure_carries_upstream_detail() {
        let err = GuardError::RemediationFailed {
            resource: "allow-all".to_string(),
            detail: serde_json::json!({"errors": [{"code": "RESOURCE_IN_USE"}]}),
        };
        assert_eq!(err.kind(), ErrorKind::RemediationFailed);
        assert!(err.to_string().contains("RESOURCE_IN_USE"));
    }
}
