//! Error and retry-policy types for the autoshift domain.
//!
//! Each component owns one error enum:
//!
//! | Error | Produced by | Caller-visible result |
//! |-------|-------------|-----------------------|
//! | [`EnvelopeError`] | envelope decoding | 400 |
//! | [`EventError`] | the event schema validator | 400 |
//! | [`MutationError`] | the cluster mutator | 500 |
//! | [`LeaseError`] | lease backends | never surfaced; the gate stays follower |
//! | [`AutoshiftError`] | start-up validation | process exits |
//!
//! [`RetryPolicy`] records whether the upstream delivery system can usefully
//! redeliver. Nothing in this workspace retries internally; the policy exists
//! so logs say which failures are worth watching for redelivery.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether redelivering the same webhook could succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// A later delivery may succeed (transient API failure, write conflict).
    Retryable,
    /// The same delivery will fail the same way (bad payload, missing resource).
    NonRetryable,
}

impl std::fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable => f.write_str("retryable"),
            Self::NonRetryable => f.write_str("non_retryable"),
        }
    }
}

// ---------------------------------------------------------------------------
// Start-up errors
// ---------------------------------------------------------------------------

/// Errors that prevent the process from starting.
#[derive(Debug, Error)]
pub enum AutoshiftError {
    /// The runtime configuration is invalid.
    ///
    /// Produced at load time; the process never starts with an invalid config.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Inbound errors
// ---------------------------------------------------------------------------

/// The outer webhook envelope could not be decoded or is not one we handle.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The body is not valid JSON or does not have the envelope shape.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope's `Type` is neither a subscription confirmation nor a notification.
    #[error("unsupported envelope type '{0}'")]
    UnsupportedKind(String),

    /// A field required for the declared `Type` is absent or empty.
    #[error("envelope of type '{kind}' is missing '{field}'")]
    MissingField {
        /// The declared envelope type.
        kind: &'static str,
        /// Wire name of the missing field.
        field: &'static str,
    },
}

/// The inner capacity event failed to decode or validate.
///
/// Parse failures and validation failures stay distinct so logs can tell a
/// corrupted payload from a schema change, even though both reject with 400.
#[derive(Debug, Error)]
pub enum EventError {
    /// The payload is not valid JSON, or an optional field has the wrong type.
    #[error("event payload is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    /// A required field is absent.
    #[error("event is missing required field '{0}'")]
    MissingField(&'static str),

    /// A required field is present but is not a non-empty string.
    #[error("event field '{0}' must be a non-empty string")]
    InvalidField(&'static str),
}

impl EventError {
    /// Stable label for the `error_kind` log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::MissingField(_) | Self::InvalidField(_) => "validation",
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound errors
// ---------------------------------------------------------------------------

/// Failures reported by the cluster mutator.
///
/// The variant is for observability only; every variant maps to the same 500.
#[derive(Debug, Error)]
pub enum MutationError {
    /// The target resource does not exist.
    #[error("resource '{0}' not found")]
    NotFound(String),

    /// The resource changed between read and write.
    #[error("resource '{0}' was modified concurrently")]
    Conflict(String),

    /// Any other transport, authentication, or decoding failure.
    #[error("cluster API unavailable: {0}")]
    Unavailable(String),
}

impl MutationError {
    /// Stable label for the `error_kind` log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unavailable(_) => "unavailable",
        }
    }

    /// Whether redelivering the triggering event could succeed.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::NotFound(_) => RetryPolicy::NonRetryable,
            Self::Conflict(_) | Self::Unavailable(_) => RetryPolicy::Retryable,
        }
    }
}

/// Failures reported by a lease backend.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Another writer updated the lease between our read and write.
    #[error("lease '{0}' was modified concurrently")]
    Conflict(String),

    /// The backend could not be reached or returned an unexpected response.
    #[error("lease backend unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_validation_failures_have_distinct_kinds() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(EventError::Parse(parse).kind(), "parse");
        assert_eq!(EventError::MissingField("version").kind(), "validation");
        assert_eq!(EventError::InvalidField("version").kind(), "validation");
    }

    #[test]
    fn missing_resource_is_not_worth_redelivering() {
        assert_eq!(
            MutationError::NotFound("default".into()).retry_policy(),
            RetryPolicy::NonRetryable
        );
        assert_eq!(
            MutationError::Conflict("default".into()).retry_policy(),
            RetryPolicy::Retryable
        );
    }
}
