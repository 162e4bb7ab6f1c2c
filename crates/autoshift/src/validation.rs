//! Event schema validation.
//!
//! Decoding and validation are two separate steps: the payload is first
//! decoded into a loose wire shape (only the JSON grammar and the optional
//! string fields can fail here), then the required fields are checked
//! explicitly. This keeps [`EventError::Parse`] and the validation variants
//! distinguishable in logs.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::EventError;
use crate::types::{CapacityEvent, EventDetail, EventMetadata};
use crate::ZoneName;

#[derive(Debug, Deserialize)]
struct WireEvent {
    version: Option<Value>,
    id: Option<String>,
    #[serde(rename = "detail-type")]
    detail_type: Option<String>,
    source: Option<String>,
    account: Option<String>,
    time: Option<String>,
    region: Option<String>,
    detail: Option<Value>,
}

/// Decodes and validates a capacity event.
///
/// Required: `version`, `detail.version`, `detail.metadata.awayFrom`, each a
/// non-empty string. Everything else defaults to an empty string when absent.
pub fn validate(raw: &[u8]) -> Result<CapacityEvent, EventError> {
    let wire: WireEvent = serde_json::from_slice(raw).map_err(EventError::Parse)?;

    let schema_version = required_str(wire.version.as_ref(), "version")?;

    let detail = wire.detail.as_ref();
    let detail_version = required_str(detail.and_then(|d| d.get("version")), "detail.version")?;
    let away_from = required_str(
        detail
            .and_then(|d| d.get("metadata"))
            .and_then(|m| m.get("awayFrom")),
        "detail.metadata.awayFrom",
    )?;
    let source_zone =
        ZoneName::new(away_from).ok_or(EventError::InvalidField("detail.metadata.awayFrom"))?;

    Ok(CapacityEvent {
        schema_version,
        event_id: wire.id.unwrap_or_default(),
        detail_type: wire.detail_type.unwrap_or_default(),
        source: wire.source.unwrap_or_default(),
        account: wire.account.unwrap_or_default(),
        timestamp: wire.time.unwrap_or_default(),
        region: wire.region.unwrap_or_default(),
        detail: EventDetail {
            schema_version: detail_version,
            metadata: EventMetadata { source_zone },
        },
    })
}

fn required_str(value: Option<&Value>, field: &'static str) -> Result<String, EventError> {
    match value {
        None | Some(Value::Null) => Err(EventError::MissingField(field)),
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(EventError::InvalidField(field)),
    }
}
