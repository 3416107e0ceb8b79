use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{MailMessage, MailTransport};
use crate::cloud::ApiError;

/// SendGrid v3 `mail/send` transport.
pub struct SendGridTransport {
    client: Client,
    base_url: String,
}

impl SendGridTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MailTransport for SendGridTransport {
    async fn send(&self, api_key: &str, message: &MailMessage) -> Result<u16, ApiError> {
        let body = json!({
            "personalizations": [{"to": [{"email": message.to}]}],
            "from": message.from,
            "subject": message.subject,
            "content": [{"type": "text/html", "value": message.html}]
        });

        debug!("Sending alert '{}' to {}", message.subject, message.to);

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(status.as_u16())
    }
}
