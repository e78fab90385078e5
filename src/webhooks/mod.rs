//! Inbound server-to-server notifications.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::services::checkout::CheckoutRegistry;

pub mod payment_confirmation;

/// How long an applied event id is remembered for replay detection.
pub const REPLAY_RETENTION_HOURS: i64 = 24;

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    pub registry: Arc<CheckoutRegistry>,
    /// `None` disables signature verification.
    pub secret: Option<String>,
    pub tolerance_secs: i64,
    pub replay_retention: Duration,
    /// Event ids already applied, with the time they were applied.
    pub processed: Arc<DashMap<String, DateTime<Utc>>>,
}

impl WebhookState {
    pub fn new(registry: Arc<CheckoutRegistry>, secret: Option<String>, tolerance_secs: i64) -> Self {
        Self {
            registry,
            secret,
            tolerance_secs,
            replay_retention: Duration::hours(REPLAY_RETENTION_HOURS),
            processed: Arc::new(DashMap::new()),
        }
    }

    pub fn with_replay_retention(mut self, retention: Duration) -> Self {
        self.replay_retention = retention;
        self
    }

    /// True if the event was applied within the retention window.
    pub fn already_processed(&self, event_id: &str) -> bool {
        let cutoff = Utc::now() - self.replay_retention;
        self.processed
            .get(event_id)
            .map_or(false, |applied_at| *applied_at > cutoff)
    }

    /// Records an applied event and forgets ids older than the retention window.
    pub fn remember(&self, event_id: &str) {
        let now = Utc::now();
        let cutoff = now - self.replay_retention;
        self.processed.retain(|_, applied_at| *applied_at > cutoff);
        self.processed.insert(event_id.to_string(), now);
    }

    pub fn from_config(registry: Arc<CheckoutRegistry>, config: &AppConfig) -> Self {
        Self::new(
            registry,
            config.webhook_secret().map(str::to_string),
            config.payment_webhook_tolerance_secs,
        )
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route(
            "/payments/confirmation",
            post(payment_confirmation::payment_confirmation),
        )
        .route("/health", get(health))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
