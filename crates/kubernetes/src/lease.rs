//! `coordination.k8s.io/v1` Lease adapter.
//!
//! Follows the client-go resource-lock rules so that this process can share a
//! lease with other client-go based electors:
//!
//! - create the Lease when it does not exist;
//! - take it over when it has no holder or has not changed for
//!   `leaseDurationSeconds` as measured on *our* clock (the remote `renewTime`
//!   is never compared against local time, so clock skew is harmless);
//! - bump `leaseTransitions` whenever the holder changes;
//! - every write carries the `resourceVersion` that was read.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use autoshift::{
    LeaseBackend, LeaseError, LeaseIdentity, LeaseName, LeadershipResult, Namespace,
    RenewalResult,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;

use crate::client::{ApiError, KubeClient};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    holder_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lease_duration_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    acquire_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    renew_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lease_transitions: Option<i64>,
}

impl LeaseSpec {
    fn holder(&self) -> Option<&str> {
        self.holder_identity.as_deref().filter(|h| !h.is_empty())
    }
}

/// A Lease as read, kept whole so unknown fields survive the PUT.
struct LeaseObject {
    raw: Value,
    spec: LeaseSpec,
    resource_version: String,
}

impl LeaseObject {
    fn parse(raw: Value) -> Result<Self, LeaseError> {
        let spec = match raw.get("spec") {
            Some(spec) if !spec.is_null() => serde_json::from_value(spec.clone())
                .map_err(|e| LeaseError::Unavailable(format!("invalid lease spec: {e}")))?,
            _ => LeaseSpec::default(),
        };
        let resource_version = raw
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            raw,
            spec,
            resource_version,
        })
    }

    fn with_spec(mut self, spec: LeaseSpec) -> Value {
        self.raw["spec"] = json!(spec);
        self.raw
    }
}

/// The last lease record we saw change, and when (on our clock).
struct Observation {
    resource_version: String,
    at: Instant,
}

/// [`LeaseBackend`] over a Kubernetes Lease.
pub struct KubeLease {
    client: KubeClient,
    namespace: Namespace,
    name: LeaseName,
    observed: Mutex<Option<Observation>>,
}

impl KubeLease {
    /// Adapter for the Lease `namespace/name`.
    pub fn new(client: KubeClient, namespace: Namespace, name: LeaseName) -> Self {
        Self {
            client,
            namespace,
            name,
            observed: Mutex::new(None),
        }
    }

    fn collection(&self) -> String {
        format!("/apis/coordination.k8s.io/v1/namespaces/{}/leases", self.namespace)
    }

    fn path(&self) -> String {
        format!("{}/{}", self.collection(), self.name)
    }

    async fn read(&self) -> Result<Option<LeaseObject>, LeaseError> {
        match self.client.get(&self.path()).await {
            Ok(raw) => LeaseObject::parse(raw).map(Some),
            Err(ApiError::NotFound) => Ok(None),
            Err(e) => Err(self.lease_error(e)),
        }
    }

    async fn write(&self, current: LeaseObject, spec: LeaseSpec) -> Result<(), LeaseError> {
        let body = current.with_spec(spec);
        let written = self
            .client
            .put(&self.path(), &body)
            .await
            .map_err(|e| self.lease_error(e))?;
        self.observe_written(&written);
        Ok(())
    }

    /// Records a changed resourceVersion; returns whether the lease is expired.
    fn expired(&self, lease: &LeaseObject) -> bool {
        let Some(duration) = lease.spec.lease_duration_seconds else {
            return true;
        };
        let Ok(mut observed) = self.observed.lock() else {
            return false;
        };
        let now = Instant::now();
        match observed.as_ref() {
            Some(seen) if seen.resource_version == lease.resource_version => {
                seen.at + Duration::from_secs(duration.max(0) as u64) <= now
            }
            _ => {
                *observed = Some(Observation {
                    resource_version: lease.resource_version.clone(),
                    at: now,
                });
                false
            }
        }
    }

    fn observe_written(&self, written: &Value) {
        let Some(resource_version) = written
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
        else {
            return;
        };
        if let Ok(mut observed) = self.observed.lock() {
            *observed = Some(Observation {
                resource_version: resource_version.to_string(),
                at: Instant::now(),
            });
        }
    }

    fn lease_error(&self, error: ApiError) -> LeaseError {
        match error {
            ApiError::Conflict(_) => LeaseError::Conflict(format!("{}/{}", self.namespace, self.name)),
            other => LeaseError::Unavailable(other.to_string()),
        }
    }
}

fn micro_time_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn duration_seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs().max(1)).unwrap_or(i64::MAX)
}

#[async_trait]
impl LeaseBackend for KubeLease {
    async fn try_acquire(
        &self,
        identity: &LeaseIdentity,
        lease_duration: Duration,
    ) -> Result<LeadershipResult, LeaseError> {
        let now = micro_time_now();

        let Some(current) = self.read().await? else {
            let spec = LeaseSpec {
                holder_identity: Some(identity.to_string()),
                lease_duration_seconds: Some(duration_seconds(lease_duration)),
                acquire_time: Some(now.clone()),
                renew_time: Some(now),
                lease_transitions: Some(0),
            };
            let body = json!({
                "apiVersion": "coordination.k8s.io/v1",
                "kind": "Lease",
                "metadata": { "name": self.name.as_str(), "namespace": self.namespace.as_str() },
                "spec": spec,
            });
            return match self.client.post(&self.collection(), &body).await {
                Ok(created) => {
                    self.observe_written(&created);
                    Ok(LeadershipResult::Acquired)
                }
                // Someone created it first; look again next round.
                Err(ApiError::Conflict(_)) => Ok(LeadershipResult::NotLeader {
                    current_leader: None,
                }),
                Err(e) => Err(self.lease_error(e)),
            };
        };

        let holder = current.spec.holder().map(str::to_string);
        let ours = holder.as_deref() == Some(identity.as_str());
        let expired = self.expired(&current);

        if let Some(other) = holder.as_ref().filter(|_| !ours && !expired) {
            return Ok(LeadershipResult::NotLeader {
                current_leader: LeaseIdentity::new(other.clone()),
            });
        }

        let mut spec = current.spec.clone();
        if !ours {
            spec.acquire_time = Some(now.clone());
            spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
            debug!(lease = %self.name, previous = ?holder, "taking over lease");
        }
        spec.holder_identity = Some(identity.to_string());
        spec.lease_duration_seconds = Some(duration_seconds(lease_duration));
        spec.renew_time = Some(now);

        match self.write(current, spec).await {
            Ok(()) => Ok(LeadershipResult::Acquired),
            Err(LeaseError::Conflict(_)) => Ok(LeadershipResult::NotLeader {
                current_leader: None,
            }),
            Err(e) => Err(e),
        }
    }

    async fn renew(
        &self,
        identity: &LeaseIdentity,
        lease_duration: Duration,
    ) -> Result<RenewalResult, LeaseError> {
        let Some(current) = self.read().await? else {
            return Ok(RenewalResult::Lost);
        };
        if current.spec.holder() != Some(identity.as_str()) {
            return Ok(RenewalResult::Lost);
        }

        let mut spec = current.spec.clone();
        spec.lease_duration_seconds = Some(duration_seconds(lease_duration));
        spec.renew_time = Some(micro_time_now());
        self.write(current, spec).await?;
        Ok(RenewalResult::Renewed)
    }

    async fn release(&self, identity: &LeaseIdentity) -> Result<bool, LeaseError> {
        let Some(current) = self.read().await? else {
            return Ok(false);
        };
        if current.spec.holder() != Some(identity.as_str()) {
            return Ok(false);
        }

        let now = micro_time_now();
        let spec = LeaseSpec {
            holder_identity: None,
            lease_duration_seconds: Some(1),
            acquire_time: Some(now.clone()),
            renew_time: Some(now),
            lease_transitions: current.spec.lease_transitions,
        };
        self.write(current, spec).await?;
        Ok(true)
    }
}
