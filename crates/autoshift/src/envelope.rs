//! The outer webhook envelope (SNS HTTP delivery format).
//!
//! SNS posts a JSON document whose `Type` decides which other keys are
//! meaningful. Decoding goes through a permissive wire struct and then into
//! [`Envelope`], an enum that can only hold the field its kind needs.

use serde::Deserialize;

use crate::errors::EnvelopeError;

const SUBSCRIPTION_CONFIRMATION: &str = "SubscriptionConfirmation";
const NOTIFICATION: &str = "Notification";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireEnvelope {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "SubscribeURL")]
    subscribe_url: Option<String>,
    message: Option<String>,
    message_id: Option<String>,
    topic_arn: Option<String>,
}

/// Delivery metadata carried by every envelope; used only for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeMeta {
    /// SNS `MessageId`.
    pub message_id: Option<String>,
    /// SNS `TopicArn`.
    pub topic_arn: Option<String>,
}

/// A decoded webhook envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// One-time handshake: GET `confirmation_target` to activate the subscription.
    SubscriptionConfirmation {
        /// The `SubscribeURL` supplied by the pub/sub backend.
        confirmation_target: String,
        /// Delivery metadata.
        meta: EnvelopeMeta,
    },
    /// A real event; `payload` is the still-encoded inner event.
    Notification {
        /// The `Message` string, expected to hold a capacity event as JSON.
        payload: String,
        /// Delivery metadata.
        meta: EnvelopeMeta,
    },
}

impl Envelope {
    /// Decodes an envelope from a request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, EnvelopeError> {
        let wire: WireEnvelope = serde_json::from_slice(body).map_err(EnvelopeError::Malformed)?;
        let meta = EnvelopeMeta {
            message_id: wire.message_id,
            topic_arn: wire.topic_arn,
        };

        match wire.kind.as_str() {
            SUBSCRIPTION_CONFIRMATION => match wire.subscribe_url {
                Some(url) if !url.is_empty() => Ok(Self::SubscriptionConfirmation {
                    confirmation_target: url,
                    meta,
                }),
                _ => Err(EnvelopeError::MissingField {
                    kind: SUBSCRIPTION_CONFIRMATION,
                    field: "SubscribeURL",
                }),
            },
            NOTIFICATION => match wire.message {
                Some(payload) => Ok(Self::Notification { payload, meta }),
                None => Err(EnvelopeError::MissingField {
                    kind: NOTIFICATION,
                    field: "Message",
                }),
            },
            _ => Err(EnvelopeError::UnsupportedKind(wire.kind)),
        }
    }

    /// Delivery metadata for logging.
    pub fn meta(&self) -> &EnvelopeMeta {
        match self {
            Self::SubscriptionConfirmation { meta, .. } | Self::Notification { meta, .. } => meta,
        }
    }
}
