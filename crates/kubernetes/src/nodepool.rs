//! Karpenter `NodePool` adapter.
//!
//! The excluded zones live in `spec.template.spec.requirements`. Writes are a
//! JSON merge patch that replaces the requirements list and carries the
//! `resourceVersion` we read, so the API server rejects it with 409 if anyone
//! else wrote in between.

use async_trait::async_trait;
use autoshift::{ClusterApi, ExclusionPolicy, MutationError, NodeRequirement, ResourceName};
use serde_json::{json, Value};
use tracing::debug;

use crate::client::{ApiError, KubeClient};

/// Default API path of Karpenter v1 NodePools (cluster-scoped).
pub const NODEPOOLS_PATH: &str = "/apis/karpenter.sh/v1/nodepools";

const REQUIREMENTS_POINTER: &str = "/spec/template/spec/requirements";

/// [`ClusterApi`] over Karpenter NodePools.
#[derive(Debug, Clone)]
pub struct NodePoolApi {
    client: KubeClient,
    collection: String,
}

impl NodePoolApi {
    /// Adapter for `karpenter.sh/v1` NodePools.
    pub fn new(client: KubeClient) -> Self {
        Self::with_collection(client, NODEPOOLS_PATH)
    }

    /// Adapter for another group/version, e.g. `/apis/karpenter.sh/v1beta1/nodepools`.
    pub fn with_collection(client: KubeClient, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into().trim_end_matches('/').to_string(),
        }
    }

    fn path(&self, name: &ResourceName) -> String {
        format!("{}/{}", self.collection, name)
    }
}

fn to_mutation_error(target: &ResourceName, error: ApiError) -> MutationError {
    match error {
        ApiError::NotFound => MutationError::NotFound(target.to_string()),
        ApiError::Conflict(_) => MutationError::Conflict(target.to_string()),
        other => MutationError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl ClusterApi for NodePoolApi {
    async fn fetch_policy(&self, target: &ResourceName) -> Result<ExclusionPolicy, MutationError> {
        let object = self
            .client
            .get(&self.path(target))
            .await
            .map_err(|e| to_mutation_error(target, e))?;

        let requirements = match object.pointer(REQUIREMENTS_POINTER) {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => serde_json::from_value::<Vec<NodeRequirement>>(value.clone())
                .map_err(|e| {
                    MutationError::Unavailable(format!("nodepool '{target}' has invalid requirements: {e}"))
                })?,
        };
        let revision = object
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string);

        debug!(nodepool = %target, revision = ?revision, requirements = requirements.len(), "fetched nodepool");
        Ok(ExclusionPolicy {
            requirements,
            revision,
        })
    }

    async fn update_policy(
        &self,
        target: &ResourceName,
        policy: &ExclusionPolicy,
    ) -> Result<(), MutationError> {
        let mut patch = json!({
            "spec": { "template": { "spec": { "requirements": policy.requirements } } }
        });
        if let Some(revision) = &policy.revision {
            patch["metadata"] = json!({ "resourceVersion": revision });
        }

        self.client
            .merge_patch(&self.path(target), &patch)
            .await
            .map_err(|e| to_mutation_error(target, e))?;
        Ok(())
    }
}
