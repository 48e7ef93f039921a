//! resource-sync library crate
//!
//! Client-side synchronization for custom resources that a remote controller
//! reconciles concurrently:
//! - `store`: versioned document stores (Kubernetes, in-memory)
//! - `handle`: local, possibly stale mirror of one resource
//! - `merge`: optimistic-concurrency create-or-update
//! - `poller`: wait for the controller to converge a resource

pub mod config;
pub mod error;
pub mod handle;
pub mod merge;
pub mod metrics;
pub mod poller;
pub mod resource;
pub mod store;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use handle::{BindingState, ReloadPolicy, ResourceHandle};
pub use merge::{Applied, MergeEngine, MergePolicy};
pub use metrics::SyncMetrics;
pub use poller::{ConvergencePoller, WaitOptions};
pub use resource::{
    ConcurrencyToken, Phase, PhaseObservation, ResourceDocument, ResourceIdentity, ResourceKind,
    StandardPhase, Versioned,
};
pub use store::{KubeStore, MemoryStore, ResourceStore};
