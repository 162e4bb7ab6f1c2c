//! Command-line and environment configuration.
//!
//! Every flag can also be set through the environment variable named in its
//! `env` attribute, which is how the Deployment manifest configures the pod.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use autoshift::{LeaseIdentity, LeaseName, LeaseTiming, Namespace, ResourceName};
use clap::{Parser, ValueEnum};
use kubernetes::NODEPOOLS_PATH;

/// Where the leadership lease lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LeaseBackendKind {
    /// A `coordination.k8s.io/v1` Lease shared by all replicas.
    Kubernetes,
    /// A process-local lease; this replica always leads. For local runs only.
    Memory,
}

/// Zonal autoshift responder.
#[derive(Debug, Parser)]
#[command(name = "zonal-autoshift", version, about, long_about = None)]
pub struct Config {
    /// Address the webhook server binds.
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// NodePool whose zone requirements are updated.
    #[arg(long = "nodepool", env = "NODEPOOL_NAME", default_value = "default")]
    pub nodepool: String,

    /// API collection path of NodePools.
    #[arg(long, env = "NODEPOOL_API_PATH", default_value = NODEPOOLS_PATH)]
    pub nodepool_api_path: String,

    /// Name of the leadership Lease.
    #[arg(long, env = "LEASE_NAME", default_value = "zonal-autoshift-karpenter")]
    pub lease_name: String,

    /// Namespace of the leadership Lease.
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub lease_namespace: String,

    /// Election identity; a random UUID when unset.
    #[arg(long, env = "POD_NAME")]
    pub identity: Option<String>,

    /// How long a lease is valid without renewal.
    #[arg(long, env = "LEASE_DURATION_SECS", default_value_t = 15)]
    pub lease_duration_secs: u64,

    /// How long the leader keeps retrying a renewal before stepping down.
    #[arg(long, env = "RENEW_DEADLINE_SECS", default_value_t = 10)]
    pub renew_deadline_secs: u64,

    /// Pause between election attempts.
    #[arg(long, env = "RETRY_PERIOD_SECS", default_value_t = 2)]
    pub retry_period_secs: u64,

    /// Lease backend.
    #[arg(long, env = "LEASE_BACKEND", value_enum, default_value_t = LeaseBackendKind::Kubernetes)]
    pub lease_backend: LeaseBackendKind,

    /// API server URL; in-cluster configuration when unset.
    #[arg(long, env = "KUBE_API_URL")]
    pub kube_api_url: Option<String>,

    /// Bearer token used with `--kube-api-url`.
    #[arg(long, env = "KUBE_TOKEN", hide_env_values = true)]
    pub kube_token: Option<String>,

    /// Timeout of the subscription confirmation GET.
    #[arg(long, env = "CONFIRM_TIMEOUT_SECS", default_value_t = 10)]
    pub confirm_timeout_secs: u64,
}

impl Config {
    /// The NodePool every directive targets.
    pub fn nodepool(&self) -> Result<ResourceName> {
        ResourceName::new(self.nodepool.as_str()).context("--nodepool must not be empty")
    }

    /// The leadership Lease name.
    pub fn lease_name(&self) -> Result<LeaseName> {
        LeaseName::new(self.lease_name.as_str()).context("--lease-name must not be empty")
    }

    /// The leadership Lease namespace.
    pub fn lease_namespace(&self) -> Result<Namespace> {
        Namespace::new(self.lease_namespace.as_str()).context("--lease-namespace must not be empty")
    }

    /// The configured identity, or a fresh random one.
    pub fn identity(&self) -> Result<LeaseIdentity> {
        match self.identity.as_deref() {
            Some(id) => LeaseIdentity::new(id).context("--identity must not be empty"),
            None => Ok(LeaseIdentity::generate()),
        }
    }

    /// Validated election timings.
    pub fn lease_timing(&self) -> Result<LeaseTiming> {
        LeaseTiming::new(
            Duration::from_secs(self.lease_duration_secs),
            Duration::from_secs(self.renew_deadline_secs),
            Duration::from_secs(self.retry_period_secs),
        )
        .context("invalid leader election timings")
    }

    /// Timeout of the subscription confirmation GET.
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }
}
