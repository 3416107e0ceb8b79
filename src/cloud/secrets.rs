use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Method;
use serde::Deserialize;

use super::{ApiError, GoogleApi, SecretStore};

/// Secret Manager `versions/*:access` client.
pub struct SecretManagerClient {
    api: GoogleApi,
    base_url: String,
    project: String,
}

#[derive(Deserialize)]
struct AccessResponse {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    data: String,
}

impl SecretManagerClient {
    pub fn new(api: GoogleApi, base_url: &str, project: &str) -> Self {
        Self {
            api,
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.to_string(),
        }
    }
}

#[async_trait]
impl SecretStore for SecretManagerClient {
    async fn access_secret(&self, name: &str, version: &str) -> Result<String, ApiError> {
        let url = format!(
            "{}/projects/{}/secrets/{}/versions/{}:access",
            self.base_url, self.project, name, version
        );
        let response = self.api.send(self.api.request(Method::GET, &url)).await?;
        let body: AccessResponse = GoogleApi::json(response).await?;

        let bytes = STANDARD
            .decode(body.payload.data.trim())
            .map_err(|e| ApiError::Decode(format!("secret payload is not base64: {}", e)))?;
        let secret = String::from_utf8(bytes)
            .map_err(|e| ApiError::Decode(format!("secret payload is not UTF-8: {}", e)))?;
        Ok(secret.trim().to_string())
    }
}
