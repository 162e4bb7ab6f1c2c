//! zonal-autoshift: the responder binary.
//!
//! Composition root for the workspace:
//!
//! 1. **Parse configuration** from flags and environment ([`config::Config`]).
//! 2. **Wire observability**: JSON `tracing` output, plus OTLP span export
//!    when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! 3. **Construct infrastructure**: the Kubernetes client, the lease backend,
//!    the NodePool adapter, and the subscription confirmer.
//! 4. **Run**: the leader election loop in the background and the webhook
//!    server in the foreground, until SIGINT or SIGTERM.
//!
//! On shutdown the server first drains in-flight requests while this replica
//! still holds the lease. Only then is the election loop cancelled: it steps
//! down and releases the lease so another replica can take over without
//! waiting for it to expire. Buffered spans are flushed last.
//!
//! # Usage
//!
//! ```text
//! zonal-autoshift --nodepool default --lease-namespace kube-system
//! ```

mod config;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use autoshift::{InMemoryLeaseBackend, LeaseBackend, LeadershipGate, ZoneExclusionMutator};
use clap::Parser;
use kubernetes::{KubeClient, KubeLease, NodePoolApi};
use listener::{build_router, HttpConfirmer, WebhookState};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, LeaseBackendKind};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    let telemetry = telemetry::init()?;

    let result = run(config).await;
    if let Err(e) = &result {
        error!(error = ?e, "zonal-autoshift exited with an error");
    }

    telemetry.shutdown();
    result
}

async fn run(config: Config) -> Result<()> {
    let nodepool = config.nodepool()?;
    let identity = config.identity()?;
    let timing = config.lease_timing()?;

    let kube = match &config.kube_api_url {
        Some(url) => KubeClient::new(url.clone(), config.kube_token.clone()),
        None => KubeClient::in_cluster(),
    }
    .context("failed to configure the Kubernetes client")?;

    let leases: Arc<dyn LeaseBackend> = match config.lease_backend {
        LeaseBackendKind::Kubernetes => Arc::new(KubeLease::new(
            kube.clone(),
            config.lease_namespace()?,
            config.lease_name()?,
        )),
        LeaseBackendKind::Memory => {
            warn!("using a process-local lease; every replica will act as leader");
            Arc::new(InMemoryLeaseBackend::new())
        }
    };

    let cluster = Arc::new(NodePoolApi::with_collection(
        kube,
        config.nodepool_api_path.as_str(),
    ));
    let confirmer = HttpConfirmer::new(config.confirm_timeout())
        .context("failed to build the confirmation HTTP client")?;

    let gate = Arc::new(LeadershipGate::new(identity, timing, leases));
    let state = WebhookState {
        confirmer: Arc::new(confirmer),
        leadership: gate.state(),
        mutator: Arc::new(ZoneExclusionMutator::new(cluster)),
        target: nodepool.clone(),
    };

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let cancel = CancellationToken::new();
    let election = {
        let gate = Arc::clone(&gate);
        let cancel = cancel.clone();
        tokio::spawn(async move { gate.start(cancel).await })
    };

    info!(
        addr = %config.listen_addr,
        nodepool = %nodepool,
        identity = %gate.identity(),
        lease_backend = ?config.lease_backend,
        "zonal-autoshift listening"
    );

    let served = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Requests have drained; stop leading only now.
    cancel.cancel();
    election.await.context("leader election task panicked")?;
    served.context("webhook server failed")?;

    info!("zonal-autoshift stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
