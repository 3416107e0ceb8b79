//! Resource API seam.
//!
//! The dispatcher and remediators only see the traits defined here. The
//! `reqwest` implementations talk to the Compute, Storage JSON and Secret
//! Manager REST APIs; tests substitute `mockall` mocks.

mod compute;
mod secrets;
mod storage;

pub use compute::ComputeClient;
pub use secrets::SecretManagerClient;
pub use storage::StorageClient;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use crate::config::ApiConfig;
use crate::policy::{BucketPolicy, FirewallSnapshot};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND.as_u16())
    }

    /// The write lost an optimistic-concurrency race (stale etag).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.status(),
            Some(s) if s == StatusCode::CONFLICT.as_u16()
                || s == StatusCode::PRECONDITION_FAILED.as_u16()
        )
    }

    /// A 4xx that repeating the same request cannot fix. Missing resources,
    /// conflicts, request timeouts and throttling are excluded.
    pub fn is_permanent_rejection(&self) -> bool {
        match self.status().and_then(|s| StatusCode::from_u16(s).ok()) {
            Some(status) => {
                status.is_client_error()
                    && !matches!(
                        status,
                        StatusCode::NOT_FOUND
                            | StatusCode::REQUEST_TIMEOUT
                            | StatusCode::CONFLICT
                            | StatusCode::PRECONDITION_FAILED
                            | StatusCode::TOO_MANY_REQUESTS
                    )
            }
            None => false,
        }
    }
}

/// Status of an asynchronous remediation operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "UPPERCASE")]
pub enum OperationStatus {
    Pending,
    Done,
    /// Terminal failure carrying the upstream error payload.
    Error(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemediationOperation {
    pub operation_id: String,
    #[serde(flatten)]
    pub status: OperationStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// Deletion accepted; completion must be polled.
    Started(RemediationOperation),
    /// The rule no longer exists.
    AlreadyGone,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FirewallApi: Send + Sync {
    /// Current rule state, `None` when the rule does not exist.
    async fn get_firewall(&self, name: &str) -> Result<Option<FirewallSnapshot>, ApiError>;

    async fn delete_firewall(&self, name: &str) -> Result<DeleteOutcome, ApiError>;

    async fn get_operation(&self, operation_id: &str) -> Result<RemediationOperation, ApiError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BucketApi: Send + Sync {
    /// Live IAM policy, `None` when the bucket does not exist.
    async fn get_iam_policy(&self, bucket: &str) -> Result<Option<BucketPolicy>, ApiError>;

    /// Write `policy` back. Fails with a conflict status when the policy
    /// changed since it was read.
    async fn set_iam_policy(&self, bucket: &str, policy: &BucketPolicy) -> Result<(), ApiError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn access_secret(&self, name: &str, version: &str) -> Result<String, ApiError>;
}

/// Authenticated HTTP plumbing shared by the Google API clients.
#[derive(Clone)]
pub struct GoogleApi {
    client: Client,
    access_token: Option<String>,
}

impl GoogleApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.access_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Parse a JSON body; a body that does not match `T` is a decode error.
    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Send and turn any non-2xx response into [`ApiError::Status`].
    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_statuses() {
        let conflict = ApiError::Status {
            status: 412,
            body: String::new(),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());

        let missing = ApiError::Status {
            status: 404,
            body: String::new(),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_conflict());
    }

    #[test]
    fn permanent_rejections() {
        let status = |status| ApiError::Status {
            status,
            body: String::new(),
        };
        assert!(status(403).is_permanent_rejection());
        assert!(status(400).is_permanent_rejection());
        for transient in [404, 408, 409, 412, 429, 500, 503] {
            assert!(!status(transient).is_permanent_rejection(), "{}", transient);
        }
        assert!(!ApiError::Decode("x".to_string()).is_permanent_rejection());
    }

    #[test]
    fn operation_serializes_status_and_error() {
        let op = RemediationOperation {
            operation_id: "operation-1".to_string(),
            status: OperationStatus::Error(serde_json::json!({"code": 3})),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["status"], "ERROR");
        assert_eq!(json["error"]["code"], 3);
    }
}
