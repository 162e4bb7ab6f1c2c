//! Webhook event source infrastructure.
//!
//! Receives SNS HTTP(S) deliveries carrying zonal autoshift events and hands
//! them to the [`autoshift`] domain:
//!
//! | Route | Handler | Purpose |
//! |-------|---------|---------|
//! | `POST /webhook` | [`handle_webhook`] | Primary SNS endpoint |
//! | `POST /sns` | [`handle_webhook`] | Alias kept for existing subscriptions |
//! | `GET /healthz` | [`healthz`] | Liveness; always `200 OK` |
//!
//! SNS posts with `Content-Type: text/plain`, so the body is taken as raw
//! bytes and decoded by [`autoshift::Envelope`] rather than an axum `Json`
//! extractor.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP status mapping and the subscription handshake live
//! here. Validation, leadership, and the exclusion rule are in [`autoshift`].

mod confirmation;
mod dispatcher;

pub use confirmation::{ConfirmationError, HttpConfirmer, SubscriptionConfirmer};
pub use dispatcher::{dispatch, handle_webhook, WebhookOutcome, WebhookState};

use axum::routing::{get, post};
use axum::Router;

/// Liveness probe. Independent of leadership and of the cluster API.
pub async fn healthz() -> &'static str {
    "OK"
}

/// Builds the service router.
pub fn build_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/sns", post(handle_webhook))
        .route("/healthz", get(healthz))
        .with_state(state)
}
