//! Human-facing violation alerts.
//!
//! Delivery is best effort: by the time an alert is sent the resource has
//! already been reverted (or the revert has failed and been recorded), so
//! a failure to resolve the mail credential or to send is logged and
//! swallowed.

mod sendgrid;
mod template;

pub use sendgrid::SendGridTransport;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cloud::{ApiError, SecretStore};
use crate::config::NotificationConfig;
use crate::dispatch::ResourceKind;
use crate::error::{GuardError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertStatus {
    Remediated,
    RevertFailed(String),
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: ResourceKind,
    pub resource_name: String,
    pub actor: String,
    pub status: AlertStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mailbox {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Mailbox {
    /// Parse `Display Name<addr@example.com>` or a bare address.
    pub fn parse(s: &str) -> Self {
        match s.split_once('<') {
            Some((name, rest)) => {
                let name = name.trim();
                Self {
                    email: rest.trim_end_matches('>').trim().to_string(),
                    name: (!name.is_empty()).then(|| name.to_string()),
                }
            }
            None => Self {
                email: s.trim().to_string(),
                name: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: Mailbox,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send `message`, returning the delivery API's status code.
    async fn send(&self, api_key: &str, message: &MailMessage) -> std::result::Result<u16, ApiError>;
}

pub struct Notifier {
    config: NotificationConfig,
    secrets: Arc<dyn SecretStore>,
    transport: Arc<dyn MailTransport>,
}

impl Notifier {
    pub fn new(
        config: NotificationConfig,
        secrets: Arc<dyn SecretStore>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            config,
            secrets,
            transport,
        }
    }

    /// Send `alert` to the configured recipient. Returns whether a message
    /// was accepted for delivery; never fails.
    pub async fn notify(&self, alert: &Alert) -> bool {
        let Some(ref recipient) = self.config.recipient else {
            debug!("No notification recipient configured, skipping alert");
            return false;
        };

        match self.deliver(recipient, alert).await {
            Ok(status) => {
                info!("Email request sent. Status code: {}", status);
                true
            }
            Err(e) => {
                warn!("Failed to notify {} about {}: {}", recipient, alert.resource_name, e);
                false
            }
        }
    }

    async fn deliver(&self, recipient: &str, alert: &Alert) -> Result<u16> {
        let api_key = self
            .secrets
            .access_secret(&self.config.secret_name, &self.config.secret_version)
            .await
            .map_err(|e| GuardError::Delivery(format!("cannot read mail credential: {}", e)))?;

        let message = self.compose(recipient, alert);
        self.transport
            .send(&api_key, &message)
            .await
            .map_err(|e| GuardError::Delivery(e.to_string()))
    }

    pub fn compose(&self, recipient: &str, alert: &Alert) -> MailMessage {
        let subject = match alert.kind {
            ResourceKind::Firewall => &self.config.firewall_subject,
            ResourceKind::Bucket => &self.config.bucket_subject,
        };
        MailMessage {
            from: Mailbox::parse(&self.config.sender),
            to: recipient.to_string(),
            subject: subject.clone(),
            html: template::render(alert),
        }
    }
}
