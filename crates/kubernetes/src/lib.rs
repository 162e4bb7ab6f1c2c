//! Kubernetes infrastructure adapter.
//!
//! Implements the cluster-facing ports of the [`autoshift`] crate:
//!
//! - [`NodePoolApi`] implements [`autoshift::ClusterApi`] over Karpenter
//!   `NodePool` objects (`karpenter.sh/v1`).
//! - [`KubeLease`] implements [`autoshift::LeaseBackend`] over a
//!   `coordination.k8s.io/v1` `Lease`, compatible with client-go electors.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. Which zone
//! to exclude and when a replica may lead are decided in [`autoshift`]; this
//! crate only moves JSON to and from the API server.
//!
//! ## Authentication
//!
//! In a pod, [`KubeClient::in_cluster`] uses the mounted service-account token
//! and CA bundle. Out of cluster, point [`KubeClient::new`] at `kubectl proxy`
//! or pass a bearer token explicitly.

mod client;
mod lease;
mod nodepool;

#[cfg(test)]
mod testing;

pub use client::{ApiError, KubeClient, KubeConfigError};
pub use lease::KubeLease;
pub use nodepool::{NodePoolApi, NODEPOOLS_PATH};
