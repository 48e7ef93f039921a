//! resource-sync - wait for a custom resource to reach a phase.
//!
//! The target is read from the environment:
//! - `RESOURCE_SYNC_API_VERSION`, `RESOURCE_SYNC_KIND`, `RESOURCE_SYNC_NAME`,
//!   `RESOURCE_SYNC_PHASE` (required)
//! - `RESOURCE_SYNC_PLURAL`, `RESOURCE_SYNC_NAMESPACE` (optional)
//!
//! Wait policy comes from `SyncConfig::from_env()`. Exits non-zero when the
//! phase is not reached or on SIGTERM/SIGINT.

use std::process::ExitCode;
use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tracing::{error, info};

use resource_sync::{
    ConvergencePoller, Error, KubeStore, ResourceHandle, ResourceIdentity, ResourceKind,
    StandardPhase, SyncConfig, SyncMetrics,
};

/// Read a required variable
fn required(key: &str) -> Result<String, Error> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("{key} must be set")))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Build the target identity from the environment
fn target_from_env() -> Result<ResourceIdentity, Error> {
    let mut kind = ResourceKind::from_api_version(
        &required("RESOURCE_SYNC_API_VERSION")?,
        required("RESOURCE_SYNC_KIND")?,
    );
    if let Some(plural) = optional("RESOURCE_SYNC_PLURAL") {
        kind = kind.with_plural(plural);
    }
    let name = required("RESOURCE_SYNC_NAME")?;
    Ok(match optional("RESOURCE_SYNC_NAMESPACE") {
        Some(namespace) => ResourceIdentity::namespaced(kind, namespace, name),
        None => ResourceIdentity::cluster_scoped(kind, name),
    })
}

async fn run(metrics: Arc<SyncMetrics>) -> Result<(), Error> {
    let config = SyncConfig::from_env()?;
    let identity = target_from_env()?;
    let target: StandardPhase = required("RESOURCE_SYNC_PHASE")?
        .parse()
        .map_err(Error::Config)?;

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let mut handle = ResourceHandle::existing(KubeStore::new(client), identity)
        .with_reload_policy(config.reload_policy());
    let poller = ConvergencePoller::new().with_metrics(metrics);

    info!(
        resource = %handle.identity(),
        phase = %target,
        timeout = ?config.wait_timeout,
        "Waiting for resource"
    );
    poller
        .wait_for_phase(&mut handle, target, &config.wait_options())
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing subscriber
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("resource_sync=info,kube=info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();

    let metrics = Arc::new(SyncMetrics::new());

    let code = tokio::select! {
        result = run(metrics.clone()) => match result {
            Ok(()) => {
                info!("Resource reached target phase");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "Wait failed");
                ExitCode::FAILURE
            }
        },
        _ = shutdown_signal() => {
            info!("Received shutdown signal, cancelling wait");
            ExitCode::FAILURE
        }
    };

    tracing::debug!(metrics = %metrics.encode(), "Final metrics");
    code
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal. Using expect() here is
/// intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
