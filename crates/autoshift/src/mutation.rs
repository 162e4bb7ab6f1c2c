//! Zone exclusion: the only cluster write this system performs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::MutationError;
use crate::types::{ExclusionDirective, ExclusionPolicy, MutationOutcome, ZoneAction};
use crate::ResourceName;

/// Port to the cluster API: one read and one conditional write.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Reads the current placement requirements of `target`.
    async fn fetch_policy(&self, target: &ResourceName) -> Result<ExclusionPolicy, MutationError>;

    /// Writes `policy` back, conditioned on `policy.revision`.
    ///
    /// Must fail with [`MutationError::Conflict`] if the resource changed since
    /// the revision was read.
    async fn update_policy(
        &self,
        target: &ResourceName,
        policy: &ExclusionPolicy,
    ) -> Result<(), MutationError>;
}

/// Applies exclusion directives.
#[async_trait]
pub trait ClusterMutator: Send + Sync {
    /// Makes sure `directive.zone` is excluded from, or for
    /// [`ZoneAction::Restore`] no longer excluded from, `directive.target`.
    ///
    /// Writes only when the requirements change.
    /// One attempt; a conflict is reported, not retried.
    async fn apply(&self, directive: &ExclusionDirective) -> Result<MutationOutcome, MutationError>;
}

/// [`ClusterMutator`] that edits the zone `NotIn` requirement through a [`ClusterApi`].
pub struct ZoneExclusionMutator {
    api: Arc<dyn ClusterApi>,
}

impl ZoneExclusionMutator {
    /// Wraps a cluster API client.
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ClusterMutator for ZoneExclusionMutator {
    async fn apply(&self, directive: &ExclusionDirective) -> Result<MutationOutcome, MutationError> {
        let mut policy = self.api.fetch_policy(&directive.target).await?;

        let (changed, outcome) = match directive.action {
            ZoneAction::Exclude => {
                let changed = policy.exclude(&directive.zone);
                let outcome = if changed {
                    MutationOutcome::Excluded
                } else {
                    MutationOutcome::AlreadyExcluded
                };
                (changed, outcome)
            }
            ZoneAction::Restore => {
                let changed = policy.restore(&directive.zone);
                let outcome = if changed {
                    MutationOutcome::Restored
                } else {
                    MutationOutcome::NotExcluded
                };
                (changed, outcome)
            }
        };

        if !changed {
            debug!(
                resource = %directive.target,
                zone = %directive.zone,
                action = directive.action.as_str(),
                "zone exclusions already up to date"
            );
            return Ok(outcome);
        }

        self.api.update_policy(&directive.target, &policy).await?;
        info!(
            resource = %directive.target,
            zone = %directive.zone,
            action = directive.action.as_str(),
            excluded = ?policy.excluded_zones().collect::<Vec<_>>(),
            "zone exclusions updated"
        );
        Ok(outcome)
    }
}
