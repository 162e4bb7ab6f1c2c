//! Webhook dispatcher.
//!
//! Turns one SNS delivery into at most one cluster mutation. Each request ends
//! in exactly one [`WebhookOutcome`], which fixes both the HTTP status and the
//! `outcome` log field.

use std::sync::Arc;

use autoshift::{
    validate, ClusterMutator, Envelope, EnvelopeError, EventError, LeaderCheck, MutationError,
    MutationOutcome, ResourceName,
};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, info, instrument, warn, Span};

use crate::confirmation::{ConfirmationError, SubscriptionConfirmer};

/// Shared handler state. Cheap to clone; every field is behind an `Arc`.
#[derive(Clone)]
pub struct WebhookState {
    /// Delivers subscription confirmations.
    pub confirmer: Arc<dyn SubscriptionConfirmer>,
    /// Read side of the leadership flag.
    pub leadership: Arc<dyn LeaderCheck>,
    /// Applies zone exclusions and restores.
    pub mutator: Arc<dyn ClusterMutator>,
    /// The NodePool every directive targets.
    pub target: ResourceName,
}

/// How a single delivery was resolved.
#[derive(Debug)]
pub enum WebhookOutcome {
    /// The subscription confirmation GET succeeded.
    Confirmed,
    /// The subscription confirmation could not be delivered.
    ConfirmationFailed(ConfirmationError),
    /// The outer envelope was malformed or of an unhandled type.
    RejectedEnvelope(EnvelopeError),
    /// The inner event failed to parse or validate.
    RejectedEvent(EventError),
    /// Valid event, but this replica does not hold the lease.
    NotLeader,
    /// The mutator ran to completion.
    Applied(MutationOutcome),
    /// The mutator failed.
    MutationFailed(MutationError),
}

impl WebhookOutcome {
    /// Stable label for the `outcome` log field.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::ConfirmationFailed(_) => "confirmation_failed",
            Self::RejectedEnvelope(_) => "rejected_envelope",
            Self::RejectedEvent(_) => "rejected_event",
            Self::NotLeader => "not_leader",
            Self::Applied(MutationOutcome::Excluded) => "excluded",
            Self::Applied(MutationOutcome::AlreadyExcluded) => "already_excluded",
            Self::Applied(MutationOutcome::Restored) => "restored",
            Self::Applied(MutationOutcome::NotExcluded) => "not_excluded",
            Self::MutationFailed(_) => "mutation_failed",
        }
    }

    /// The status SNS sees. Anything outside 2xx makes it redeliver.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Confirmed | Self::NotLeader | Self::Applied(_) => StatusCode::OK,
            Self::ConfirmationFailed(ConfirmationError::InvalidTarget(_)) => StatusCode::BAD_REQUEST,
            Self::ConfirmationFailed(_) => StatusCode::BAD_GATEWAY,
            Self::RejectedEnvelope(_) | Self::RejectedEvent(_) => StatusCode::BAD_REQUEST,
            Self::MutationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Response body; the error message for failures.
    pub fn detail(&self) -> String {
        match self {
            Self::Confirmed => "subscription confirmed".to_string(),
            Self::NotLeader => "not leader; ignored".to_string(),
            Self::Applied(_) => "OK".to_string(),
            Self::ConfirmationFailed(e) => e.to_string(),
            Self::RejectedEnvelope(e) => e.to_string(),
            Self::RejectedEvent(e) => e.to_string(),
            Self::MutationFailed(e) => e.to_string(),
        }
    }
}

impl IntoResponse for WebhookOutcome {
    fn into_response(self) -> Response {
        (self.status(), self.detail()).into_response()
    }
}

/// axum handler for `POST /webhook` and `POST /sns`.
pub async fn handle_webhook(State(state): State<WebhookState>, body: Bytes) -> Response {
    dispatch(&state, &body).await.into_response()
}

/// Runs one delivery through the state machine.
#[instrument(
    name = "webhook",
    skip_all,
    fields(message_id = tracing::field::Empty, topic_arn = tracing::field::Empty)
)]
pub async fn dispatch(state: &WebhookState, body: &[u8]) -> WebhookOutcome {
    let envelope = match Envelope::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            let outcome = WebhookOutcome::RejectedEnvelope(e);
            warn!(outcome = outcome.label(), error = %outcome.detail(), "rejected webhook envelope");
            return outcome;
        }
    };

    let span = Span::current();
    let meta = envelope.meta();
    if let Some(id) = &meta.message_id {
        span.record("message_id", id.as_str());
    }
    if let Some(arn) = &meta.topic_arn {
        span.record("topic_arn", arn.as_str());
    }

    match envelope {
        Envelope::SubscriptionConfirmation {
            confirmation_target, ..
        } => confirm(state, &confirmation_target).await,
        Envelope::Notification { payload, .. } => notify(state, payload.as_bytes()).await,
    }
}

async fn confirm(state: &WebhookState, target: &str) -> WebhookOutcome {
    let outcome = match state.confirmer.confirm(target).await {
        Ok(()) => WebhookOutcome::Confirmed,
        Err(e) => WebhookOutcome::ConfirmationFailed(e),
    };
    match &outcome {
        WebhookOutcome::Confirmed => info!(outcome = outcome.label(), "subscription confirmed"),
        _ => error!(
            outcome = outcome.label(),
            error = %outcome.detail(),
            "subscription confirmation failed"
        ),
    }
    outcome
}

async fn notify(state: &WebhookState, payload: &[u8]) -> WebhookOutcome {
    let event = match validate(payload) {
        Ok(event) => event,
        Err(e) => {
            let error_kind = e.kind();
            let outcome = WebhookOutcome::RejectedEvent(e);
            warn!(
                outcome = outcome.label(),
                error_kind,
                error = %outcome.detail(),
                "rejected capacity event"
            );
            return outcome;
        }
    };

    let directive = event.directive_for(state.target.clone());
    if !state.leadership.is_leader() {
        let outcome = WebhookOutcome::NotLeader;
        info!(
            outcome = outcome.label(),
            event_id = %event.event_id,
            detail_type = %event.detail_type,
            zone = %directive.zone,
            action = directive.action.as_str(),
            "not leader; skipping capacity event"
        );
        return outcome;
    }

    match state.mutator.apply(&directive).await {
        Ok(applied) => {
            let outcome = WebhookOutcome::Applied(applied);
            info!(
                outcome = outcome.label(),
                event_id = %event.event_id,
                detail_type = %event.detail_type,
                resource = %directive.target,
                zone = %directive.zone,
                action = directive.action.as_str(),
                "capacity event handled"
            );
            outcome
        }
        Err(e) => {
            let error_kind = e.kind();
            let retry = e.retry_policy();
            let outcome = WebhookOutcome::MutationFailed(e);
            error!(
                outcome = outcome.label(),
                event_id = %event.event_id,
                detail_type = %event.detail_type,
                resource = %directive.target,
                zone = %directive.zone,
                action = directive.action.as_str(),
                error_kind,
                retry = %retry,
                error = %outcome.detail(),
                "zone exclusion update failed"
            );
            outcome
        }
    }
}
