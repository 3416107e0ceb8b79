//! Pub/Sub push endpoint.
//!
//! Each delivery is one invocation. The HTTP status tells Pub/Sub whether
//! to redeliver: 2xx acks, anything else is retried with backoff.

use anyhow::Result;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, Outcome, ResourceKind};
use crate::event::PushRequest;

pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    pub fn new(config: &ServerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config: config.clone(),
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let app = router(self.dispatcher.clone());

        let addr: SocketAddr = format!("{}:{}", self.config.bind, self.config.port).parse()?;

        info!("Listening for push deliveries on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/pubsub", post(push_any))
        .route("/pubsub/firewall", post(push_firewall))
        .route("/pubsub/bucket", post(push_bucket))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn push_any(State(dispatcher): State<Arc<Dispatcher>>, Json(request): Json<PushRequest>) -> Response {
    handle_push(&dispatcher, request, None).await
}

async fn push_firewall(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(request): Json<PushRequest>,
) -> Response {
    handle_push(&dispatcher, request, Some(ResourceKind::Firewall)).await
}

async fn push_bucket(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(request): Json<PushRequest>,
) -> Response {
    handle_push(&dispatcher, request, Some(ResourceKind::Bucket)).await
}

async fn handle_push(
    dispatcher: &Dispatcher,
    request: PushRequest,
    expected: Option<ResourceKind>,
) -> Response {
    debug!(
        "Push delivery from {}",
        request.subscription.as_deref().unwrap_or("unknown subscription")
    );
    let outcome = dispatcher.dispatch(&request.message, expected).await;
    (status_for(&outcome), Json(outcome)).into_response()
}

/// Ack everything except failures a redelivery could fix.
pub fn status_for(outcome: &Outcome) -> StatusCode {
    match outcome {
        Outcome::Handled { .. } | Outcome::Ignored { .. } => StatusCode::OK,
        Outcome::Failed { error, .. } if error.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        Outcome::Failed { .. } => StatusCode::OK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::remediation::RevertOutcome;

    fn failed(error: ErrorKind) -> Outcome {
        Outcome::Failed {
            error,
            detail: String::new(),
            notified: false,
        }
    }

    #[test]
    fn retryable_failures_are_nacked() {
        assert_eq!(
            status_for(&failed(ErrorKind::SnapshotFetch)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&failed(ErrorKind::PolicyConflict)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn bad_messages_are_acked() {
        assert_eq!(status_for(&failed(ErrorKind::MalformedEvent)), StatusCode::OK);
        assert_eq!(
            status_for(&failed(ErrorKind::UnrecognizedSchema)),
            StatusCode::OK
        );
        assert_eq!(status_for(&failed(ErrorKind::RevertRejected)), StatusCode::OK);
    }

    #[tokio::test]
    async fn push_endpoint_reports_outcome() {
        use crate::cloud::{MockBucketApi, MockFirewallApi, MockSecretStore, test_server};
        use crate::config::{NotificationConfig, RemediationConfig};
        use crate::notify::{MockMailTransport, Notifier};
        use crate::policy::WhitelistStore;
        use serde_json::json;

        let notifier = Notifier::new(
            NotificationConfig::default(),
            Arc::new(MockSecretStore::new()),
            Arc::new(MockMailTransport::new()),
        );
        let dispatcher = Dispatcher::new(
            Arc::new(WhitelistStore::default()),
            Arc::new(MockFirewallApi::new()),
            Arc::new(MockBucketApi::new()),
            notifier,
            &RemediationConfig::default(),
        );
        let base = test_server::spawn(router(Arc::new(dispatcher))).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/pubsub/firewall", base))
            .json(&json!({"message": {"data": "not-base64!", "messageId": "1"}, "subscription": "s"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["outcome"], "failed");
        assert_eq!(body["error"], "malformed_event");

        let health = client.get(format!("{}/health", base)).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "OK");
    }

    #[test]
    fn handled_and_ignored_are_acked() {
        let handled = Outcome::Handled {
            resource_kind: ResourceKind::Bucket,
            resource: "b".to_string(),
            violation: true,
            remediation: Some(RevertOutcome::Reverted),
            notified: false,
        };
        assert_eq!(status_for(&handled), StatusCode::OK);
        assert_eq!(
            status_for(&Outcome::Ignored {
                reason: String::new()
            }),
            StatusCode::OK
        );
    }
}
