use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{ApiError, DeleteOutcome, FirewallApi, GoogleApi, OperationStatus, RemediationOperation};
use crate::policy::FirewallSnapshot;

/// Compute Engine global firewall and global operation endpoints.
pub struct ComputeClient {
    api: GoogleApi,
    base_url: String,
    project: String,
}

/// Compute `Operation` resource, reduced to what the poll loop needs.
#[derive(Debug, Deserialize)]
struct OperationResource {
    name: String,
    status: String,
    #[serde(default)]
    error: Option<Value>,
}

impl From<OperationResource> for RemediationOperation {
    fn from(op: OperationResource) -> Self {
        let status = match (op.status.as_str(), op.error) {
            ("DONE", Some(error)) => OperationStatus::Error(error),
            ("DONE", None) => OperationStatus::Done,
            _ => OperationStatus::Pending,
        };
        RemediationOperation {
            operation_id: op.name,
            status,
        }
    }
}

impl ComputeClient {
    pub fn new(api: GoogleApi, base_url: &str, project: &str) -> Self {
        Self {
            api,
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.to_string(),
        }
    }

    fn firewall_url(&self, name: &str) -> String {
        format!(
            "{}/projects/{}/global/firewalls/{}",
            self.base_url, self.project, name
        )
    }

    fn operation_url(&self, operation_id: &str) -> String {
        format!(
            "{}/projects/{}/global/operations/{}",
            self.base_url, self.project, operation_id
        )
    }
}

#[async_trait]
impl FirewallApi for ComputeClient {
    async fn get_firewall(&self, name: &str) -> Result<Option<FirewallSnapshot>, ApiError> {
        let request = self.api.request(Method::GET, &self.firewall_url(name));
        match self.api.send(request).await {
            Ok(response) => {
                let snapshot: FirewallSnapshot = GoogleApi::json(response).await?;
                debug!("Firewall rule ({}) details: {:?}", name, snapshot);
                Ok(Some(snapshot))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_firewall(&self, name: &str) -> Result<DeleteOutcome, ApiError> {
        let request = self.api.request(Method::DELETE, &self.firewall_url(name));
        match self.api.send(request).await {
            Ok(response) => {
                let op: OperationResource = GoogleApi::json(response).await?;
                Ok(DeleteOutcome::Started(op.into()))
            }
            Err(e) if e.is_not_found() => Ok(DeleteOutcome::AlreadyGone),
            Err(e) => Err(e),
        }
    }

    async fn get_operation(&self, operation_id: &str) -> Result<RemediationOperation, ApiError> {
        let request = self
            .api
            .request(Method::GET, &self.operation_url(operation_id));
        let response = self.api.send(request).await?;
        let op: OperationResource = GoogleApi::json(response).await?;
        Ok(op.into())
    }
}
