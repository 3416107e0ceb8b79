//! Per-invocation control flow.
//!
//! ```text
//! Decode -> Classify -> Ignore
//!                    -> FetchSnapshot -> Validate -> Compliant
//!                                                 -> Violation -> Remediate -> Notify
//! ```
//!
//! Every error raised below this level is logged and folded into an
//! [`Outcome`]; nothing escapes to the host adapter.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::cloud::{
    BucketApi, ComputeClient, FirewallApi, GoogleApi, SecretManagerClient, StorageClient,
};
use crate::config::{Config, RemediationConfig};
use crate::error::{ErrorKind, GuardError};
use crate::event::{self, ChangeEvent, Envelope, PayloadSchema};
use crate::notify::{Alert, AlertStatus, Notifier, SendGridTransport};
use crate::policy::{self, WhitelistStore};
use crate::remediation::{BucketRemediator, FirewallRemediator, PollSettings, RevertOutcome};

pub const FIREWALL_RESOURCE_TYPE: &str = "firewall";
pub const OPERATION_DONE: &str = "GCE_OPERATION_DONE";
pub const STORAGE_SERVICE: &str = "storage.googleapis.com";

pub const MONITORED_FIREWALL_OPERATIONS: &[&str] = &[
    "compute.firewalls.patch",
    "compute.firewalls.insert",
    "compute.firewalls.update",
];

pub const MONITORED_BUCKET_METHODS: &[&str] = &[
    "storage.buckets.create",
    "storage.buckets.update",
    "storage.setIamPermissions",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Firewall,
    Bucket,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Firewall => write!(f, "firewall"),
            ResourceKind::Bucket => write!(f, "bucket"),
        }
    }
}

/// Result of one invocation, consumed by the host adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Handled {
        resource_kind: ResourceKind,
        resource: String,
        violation: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        remediation: Option<RevertOutcome>,
        notified: bool,
    },
    Ignored {
        reason: String,
    },
    Failed {
        error: ErrorKind,
        detail: String,
        notified: bool,
    },
}

impl Outcome {
    fn ignored(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        debug!("Ignoring event: {}", reason);
        Outcome::Ignored { reason }
    }

    fn compliant(kind: ResourceKind, resource: &str) -> Self {
        Outcome::Handled {
            resource_kind: kind,
            resource: resource.to_string(),
            violation: false,
            remediation: None,
            notified: false,
        }
    }

    fn failed(err: &GuardError, notified: bool) -> Self {
        Outcome::Failed {
            error: err.kind(),
            detail: err.to_string(),
            notified,
        }
    }
}

pub struct Dispatcher {
    whitelist: Arc<WhitelistStore>,
    firewalls: Arc<dyn FirewallApi>,
    firewall_remediator: FirewallRemediator,
    bucket_remediator: BucketRemediator,
    notifier: Notifier,
    invocation_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        whitelist: Arc<WhitelistStore>,
        firewalls: Arc<dyn FirewallApi>,
        buckets: Arc<dyn BucketApi>,
        notifier: Notifier,
        remediation: &RemediationConfig,
    ) -> Self {
        Self {
            whitelist,
            firewall_remediator: FirewallRemediator::new(
                firewalls.clone(),
                PollSettings::from(remediation),
            ),
            firewalls,
            bucket_remediator: BucketRemediator::new(buckets, remediation.bucket_max_attempts),
            notifier,
            invocation_timeout: Duration::from_secs(remediation.invocation_timeout_secs),
        }
    }

    /// Wire the production clients from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.project_id.trim().is_empty() {
            anyhow::bail!("PROJECT_ID is not configured");
        }

        let whitelist = config
            .whitelist_store()
            .context("Failed to load whitelist")?;
        info!(
            "Loaded {} firewall and {} bucket whitelist entries",
            whitelist.firewall.len(),
            whitelist.buckets.len()
        );

        let api = GoogleApi::new(&config.api).context("Failed to build HTTP client")?;
        let firewalls = Arc::new(ComputeClient::new(
            api.clone(),
            &config.api.compute_base_url,
            &config.project_id,
        ));
        let buckets = Arc::new(StorageClient::new(
            api.clone(),
            &config.api.storage_base_url,
        ));
        let secrets = Arc::new(SecretManagerClient::new(
            api,
            &config.api.secret_manager_base_url,
            &config.project_id,
        ));
        let transport = Arc::new(
            SendGridTransport::new(
                &config.notification.api_base_url,
                Duration::from_secs(config.api.request_timeout_secs),
            )
            .context("Failed to build mail client")?,
        );
        let notifier = Notifier::new(config.notification.clone(), secrets, transport);

        Ok(Self::new(
            Arc::new(whitelist),
            firewalls,
            buckets,
            notifier,
            &config.remediation,
        ))
    }

    /// Process one delivery. `expected` restricts the invocation to one
    /// resource kind (a kind-specific endpoint); `None` accepts either.
    ///
    /// The whole invocation runs under the configured budget. When the
    /// budget runs out the in-flight work is dropped, which may leave a
    /// reverted resource without a notification.
    pub async fn dispatch(&self, envelope: &Envelope, expected: Option<ResourceKind>) -> Outcome {
        let span = info_span!(
            "invocation",
            id = %Uuid::new_v4(),
            message_id = envelope.message_id.as_deref().unwrap_or("-"),
        );

        async {
            match tokio::time::timeout(self.invocation_timeout, self.run(envelope, expected)).await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(
                        "Invocation exceeded its {:?} budget and was abandoned",
                        self.invocation_timeout
                    );
                    Outcome::Failed {
                        error: ErrorKind::RemediationTimeout,
                        detail: format!(
                            "invocation exceeded its {:?} budget",
                            self.invocation_timeout
                        ),
                        notified: false,
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, envelope: &Envelope, expected: Option<ResourceKind>) -> Outcome {
        let event = match event::decode(envelope) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping undecodable event: {}", e);
                return Outcome::failed(&e, false);
            }
        };

        let kind = match classify(&event) {
            Some(kind) => kind,
            None => {
                return Outcome::ignored(format!(
                    "unmonitored resource type {}",
                    event.resource_type
                ));
            }
        };
        if let Some(expected) = expected
            && expected != kind
        {
            return Outcome::ignored(format!("{} event delivered to {} handler", kind, expected));
        }

        let result = match kind {
            ResourceKind::Firewall => self.handle_firewall(&event).await,
            ResourceKind::Bucket => self.handle_bucket(&event).await,
        };

        result.unwrap_or_else(|e| {
            warn!("Cannot evaluate {} {}: {}", kind, event.resource_name, e);
            Outcome::failed(&e, false)
        })
    }

    async fn handle_firewall(&self, event: &ChangeEvent) -> Result<Outcome, GuardError> {
        if event.event_type() != Some(OPERATION_DONE) {
            return Ok(Outcome::ignored(format!(
                "event type {} is not {}",
                event.event_type().unwrap_or("-"),
                OPERATION_DONE
            )));
        }
        if !MONITORED_FIREWALL_OPERATIONS.contains(&event.operation_kind.as_str()) {
            return Ok(Outcome::ignored(format!(
                "Ignore event type:{}",
                event.operation_kind
            )));
        }

        let name = &event.resource_name;
        let snapshot = self
            .firewalls
            .get_firewall(name)
            .await
            .map_err(|e| GuardError::SnapshotFetch {
                resource: name.clone(),
                detail: e.to_string(),
            })?;
        let Some(snapshot) = snapshot else {
            return Ok(Outcome::ignored(format!(
                "firewall rule {} no longer exists",
                name
            )));
        };

        let verdict = policy::firewall::evaluate(&snapshot, &self.whitelist.firewall);
        if !verdict.is_violation {
            return Ok(Outcome::compliant(ResourceKind::Firewall, name));
        }

        warn!("Firewall rule {} violates policy: {}", name, verdict.reason);
        Ok(self
            .remediate(
                ResourceKind::Firewall,
                name,
                &event.actor,
                self.firewall_remediator.revert(name),
            )
            .await)
    }

    async fn handle_bucket(&self, event: &ChangeEvent) -> Result<Outcome, GuardError> {
        if !MONITORED_BUCKET_METHODS.contains(&event.operation_kind.as_str()) {
            return Ok(Outcome::ignored(format!(
                "Ignore method:{}",
                event.operation_kind
            )));
        }

        let bucket = bucket_name(&event.resource_name);
        let deltas = event.binding_deltas()?;

        let verdict = policy::bucket::evaluate(bucket, &deltas, &self.whitelist);
        if !verdict.is_violation {
            return Ok(Outcome::compliant(ResourceKind::Bucket, bucket));
        }

        warn!("Bucket {} violates policy: {}", bucket, verdict.reason);
        Ok(self
            .remediate(
                ResourceKind::Bucket,
                bucket,
                &event.actor,
                self.bucket_remediator.revert(bucket),
            )
            .await)
    }

    /// Run the revert, then alert the operator either way.
    ///
    /// A redelivered event whose resource is already compliant produces no
    /// second alert.
    async fn remediate<F>(&self, kind: ResourceKind, resource: &str, actor: &str, revert: F) -> Outcome
    where
        F: Future<Output = crate::error::Result<RevertOutcome>>,
    {
        match revert.await {
            Ok(RevertOutcome::AlreadyCompliant) => Outcome::Handled {
                resource_kind: kind,
                resource: resource.to_string(),
                violation: true,
                remediation: Some(RevertOutcome::AlreadyCompliant),
                notified: false,
            },
            Ok(RevertOutcome::Reverted) => {
                let notified = self
                    .notifier
                    .notify(&Alert {
                        kind,
                        resource_name: resource.to_string(),
                        actor: actor.to_string(),
                        status: AlertStatus::Remediated,
                    })
                    .await;
                Outcome::Handled {
                    resource_kind: kind,
                    resource: resource.to_string(),
                    violation: true,
                    remediation: Some(RevertOutcome::Reverted),
                    notified,
                }
            }
            Err(e) => {
                error!("Remediation of {} {} failed: {}", kind, resource, e);
                let notified = self
                    .notifier
                    .notify(&Alert {
                        kind,
                        resource_name: resource.to_string(),
                        actor: actor.to_string(),
                        status: AlertStatus::RevertFailed(e.to_string()),
                    })
                    .await;
                Outcome::failed(&e, notified)
            }
        }
    }
}

fn classify(event: &ChangeEvent) -> Option<ResourceKind> {
    match event.schema {
        PayloadSchema::JsonPayload if event.resource_type == FIREWALL_RESOURCE_TYPE => {
            Some(ResourceKind::Firewall)
        }
        PayloadSchema::ProtoPayload if event.resource_type == STORAGE_SERVICE => {
            Some(ResourceKind::Bucket)
        }
        _ => None,
    }
}

/// `projects/_/buckets/name` -> `name`
fn bucket_name(resource_name: &str) -> &str {
    resource_name.rsplit('/').next().unwrap_or(resource_name)
}
