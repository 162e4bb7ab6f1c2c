//! Shared value types for the autoshift domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! the data that flows through one webhook call: the validated event, the
//! directive derived from it, and the placement policy it is applied to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ResourceName, ZoneName};

/// Well-known node label holding zone names (`us-east-1a`).
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// Karpenter's well-known AWS node label holding zone ids (`use1-az1`).
pub const ZONE_ID_LABEL: &str = "topology.k8s.aws/zone-id";

/// `detail-type` values that end a shift. Every other type starts one.
const SHIFT_ENDED: &[&str] = &[
    "Autoshift Completed",
    "FIS Experiment Autoshift Canceled",
    "FIS Experiment Autoshift Completed",
    "Practice Run Succeeded",
    "Practice Run Interrupted",
    "Practice Run Failed",
];

/// The node label a zone is matched against.
pub fn zone_label(zone: &ZoneName) -> &'static str {
    if zone.is_zone_id() {
        ZONE_ID_LABEL
    } else {
        ZONE_LABEL
    }
}

// ---------------------------------------------------------------------------
// Capacity events
// ---------------------------------------------------------------------------

/// A validated capacity-rebalance event.
///
/// Only produced by [`crate::validate`]; the required fields are guaranteed
/// non-empty and optional fields absent on the wire are empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityEvent {
    /// Envelope schema version (`version`).
    pub schema_version: String,
    /// Event id (`id`).
    pub event_id: String,
    /// Event type, e.g. `"Autoshift In Progress"` (`detail-type`).
    pub detail_type: String,
    /// Emitting service, e.g. `"aws.arc-zonal-shift"` (`source`).
    pub source: String,
    /// Account id (`account`).
    pub account: String,
    /// RFC3339 emission time (`time`), unparsed.
    pub timestamp: String,
    /// Region (`region`).
    pub region: String,
    /// Event-specific body.
    pub detail: EventDetail,
}

/// The `detail` object of a [`CapacityEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDetail {
    /// Detail schema version (`detail.version`).
    pub schema_version: String,
    /// Zone metadata.
    pub metadata: EventMetadata,
}

/// The `detail.metadata` object of a [`CapacityEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    /// The zone capacity is shifting away from (`detail.metadata.awayFrom`).
    pub source_zone: ZoneName,
}

impl CapacityEvent {
    /// The zone to evacuate.
    pub fn source_zone(&self) -> &ZoneName {
        &self.detail.metadata.source_zone
    }

    /// Parses `timestamp`; `None` if it is empty or not RFC3339.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Whether the event starts a shift away from its zone or ends one.
    pub fn action(&self) -> ZoneAction {
        if SHIFT_ENDED.contains(&self.detail_type.as_str()) {
            ZoneAction::Restore
        } else {
            ZoneAction::Exclude
        }
    }

    /// The directive this event asks of `target`.
    pub fn directive_for(&self, target: ResourceName) -> ExclusionDirective {
        ExclusionDirective {
            target,
            zone: self.source_zone().clone(),
            action: self.action(),
        }
    }
}

// ---------------------------------------------------------------------------
// Exclusion
// ---------------------------------------------------------------------------

/// What to do with a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneAction {
    /// Stop placing new capacity in the zone.
    Exclude,
    /// Allow the zone again.
    Restore,
}

impl ZoneAction {
    /// Stable label for the `action` log field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exclude => "exclude",
            Self::Restore => "restore",
        }
    }
}

/// Instruction to exclude `zone` from, or restore it to, `target`.
///
/// Built and consumed within a single request; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExclusionDirective {
    /// The cluster resource to update.
    pub target: ResourceName,
    /// The zone concerned.
    pub zone: ZoneName,
    /// Exclude or restore.
    pub action: ZoneAction,
}

/// One node-selector requirement, in Kubernetes `NodeSelectorRequirement` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRequirement {
    /// Label key.
    pub key: String,
    /// `In`, `NotIn`, `Exists`, `DoesNotExist`, `Gt`, `Lt`.
    pub operator: String,
    /// Operand values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    /// Karpenter extension: minimum distinct values the scheduler must consider.
    #[serde(default, rename = "minValues", skip_serializing_if = "Option::is_none")]
    pub min_values: Option<u32>,
}

/// The placement requirements of a cluster resource, as last read.
///
/// Zone names are excluded through a `NotIn` on [`ZONE_LABEL`], zone ids
/// through a `NotIn` on [`ZONE_ID_LABEL`]. `revision` is the opaque version
/// the write must be conditioned on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionPolicy {
    /// All requirements; only the zone `NotIn` ones are ever edited.
    pub requirements: Vec<NodeRequirement>,
    /// Opaque concurrency token (e.g. a Kubernetes `resourceVersion`).
    pub revision: Option<String>,
}

impl ExclusionPolicy {
    /// Zones and zone ids currently excluded, in stored order.
    pub fn excluded_zones(&self) -> impl Iterator<Item = &str> {
        self.requirements
            .iter()
            .filter(|r| is_zone_exclusion(r))
            .flat_map(|r| r.values.iter().map(String::as_str))
    }

    /// Returns `true` if `zone` is excluded on the label it belongs to.
    pub fn excludes(&self, zone: &ZoneName) -> bool {
        let label = zone_label(zone);
        self.requirements
            .iter()
            .filter(|r| is_exclusion_on(r, label))
            .any(|r| r.values.iter().any(|v| v == zone.as_str()))
    }

    /// Adds `zone` to the `NotIn` requirement of its label, creating it if
    /// needed.
    ///
    /// Returns `false` (and leaves the policy untouched) if the zone was
    /// already excluded.
    pub fn exclude(&mut self, zone: &ZoneName) -> bool {
        if self.excludes(zone) {
            return false;
        }

        let label = zone_label(zone);
        match self
            .requirements
            .iter_mut()
            .find(|r| is_exclusion_on(r, label))
        {
            Some(requirement) => requirement.values.push(zone.to_string()),
            None => self.requirements.push(NodeRequirement {
                key: label.to_string(),
                operator: "NotIn".to_string(),
                values: vec![zone.to_string()],
                min_values: None,
            }),
        }
        true
    }

    /// Removes `zone` from every zone `NotIn` requirement. A requirement left
    /// without values is dropped, since the API server rejects an empty `NotIn`.
    ///
    /// Returns `false` (and leaves the policy untouched) if the zone was not
    /// excluded.
    pub fn restore(&mut self, zone: &ZoneName) -> bool {
        if !self.excluded_zones().any(|z| z == zone.as_str()) {
            return false;
        }

        for requirement in self.requirements.iter_mut().filter(|r| is_zone_exclusion(r)) {
            requirement.values.retain(|v| v != zone.as_str());
        }
        self.requirements
            .retain(|r| !(is_zone_exclusion(r) && r.values.is_empty()));
        true
    }
}

fn is_exclusion_on(requirement: &NodeRequirement, label: &str) -> bool {
    requirement.key == label && requirement.operator == "NotIn"
}

fn is_zone_exclusion(requirement: &NodeRequirement) -> bool {
    is_exclusion_on(requirement, ZONE_LABEL) || is_exclusion_on(requirement, ZONE_ID_LABEL)
}

/// What [`crate::ClusterMutator::apply`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The zone was added and the resource updated.
    Excluded,
    /// The zone was already excluded; nothing was written.
    AlreadyExcluded,
    /// The zone was removed from the exclusions and the resource updated.
    Restored,
    /// The zone was not excluded; nothing was written.
    NotExcluded,
}
