//! Shared test cluster singleton.
//!
//! Provides a Kubernetes cluster connection for all integration tests.
//! Each test creates its own Client from the shared cluster for isolation.

use kube::{Client, Config};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Global shared test cluster instance.
static SHARED_CLUSTER: OnceCell<Arc<SharedTestCluster>> = OnceCell::const_new();

/// Shared test cluster providing Kubernetes connectivity.
///
/// Uses a singleton pattern to ensure connectivity is validated and the test
/// CRD installed once. Each test creates its own Client via `new_client()`.
pub struct SharedTestCluster {
    _marker: (),
}

impl SharedTestCluster {
    /// Get or create the shared test cluster.
    ///
    /// This function is safe to call from multiple tests concurrently.
    /// The first call validates connectivity and installs the `Widget` CRD,
    /// subsequent calls return the cached instance.
    pub async fn get() -> Arc<SharedTestCluster> {
        SHARED_CLUSTER
            .get_or_init(|| async {
                let cluster = Self::connect().await.expect(
                    "Failed to connect to Kubernetes cluster. Is your kubeconfig configured?",
                );
                let client = cluster.new_client().await;
                crate::fixtures::ensure_widget_crd(&client)
                    .await
                    .expect("Failed to install Widget CRD");
                Arc::new(cluster)
            })
            .await
            .clone()
    }

    /// Create a new Kubernetes client.
    ///
    /// Each test should call this to get its own isolated client.
    pub async fn new_client(&self) -> Client {
        let config = Config::infer().await.expect("Failed to infer kube config");
        Client::try_from(config).expect("Failed to create kube client")
    }

    /// Connect to the cluster using kubeconfig
    async fn connect() -> Result<Self, kube::Error> {
        let config = Config::infer()
            .await
            .map_err(|e| kube::Error::Service(std::io::Error::other(e.to_string()).into()))?;
        let client = Client::try_from(config)?;

        // Quick health check
        let version = client.apiserver_version().await?;
        tracing::info!(
            "Connected to Kubernetes cluster: {} {}",
            version.platform,
            version.git_version
        );

        Ok(Self { _marker: () })
    }
}
