//! Remote resource stores.
//!
//! A store is a keyed, versioned document store: every read returns the
//! document's current `ConcurrencyToken` and every patch must present one.
//!
//! - `kube_store`: the Kubernetes API via dynamic objects
//! - `memory`: an in-process store with fault injection, for tests and
//!   local simulation

pub mod kube_store;
pub mod memory;

use std::future::Future;

use serde_json::Value;

use crate::error::Result;
use crate::resource::{ConcurrencyToken, ResourceDocument, ResourceIdentity, Versioned};

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

/// Keyed, versioned document store.
///
/// Implementations classify failures into `Error::NotFound`,
/// `Error::AlreadyExists`, `Error::Conflict` and `Error::TransientNetwork`;
/// anything else is a hard error.
pub trait ResourceStore: Send + Sync {
    /// Read the current document and token.
    fn get(&self, identity: &ResourceIdentity) -> impl Future<Output = Result<Versioned>> + Send;

    /// Create a document. Fails with `AlreadyExists` if the key is taken.
    fn create(
        &self,
        identity: &ResourceIdentity,
        document: &ResourceDocument,
    ) -> impl Future<Output = Result<Versioned>> + Send;

    /// Apply a JSON merge patch if `token` is still current.
    /// Fails with `Conflict` when it is not, `NotFound` when the document is gone.
    fn patch(
        &self,
        identity: &ResourceIdentity,
        token: &ConcurrencyToken,
        patch: &Value,
    ) -> impl Future<Output = Result<Versioned>> + Send;

    /// Delete the document.
    fn delete(&self, identity: &ResourceIdentity) -> impl Future<Output = Result<()>> + Send;
}
