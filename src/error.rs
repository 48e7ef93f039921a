//! Error types for resource synchronization.
//!
//! Store outcomes that drive the merge loop (`NotFound`, `AlreadyExists`,
//! `Conflict`) are explicit variants so callers match on them instead of
//! inspecting HTTP status codes.

use std::time::Duration;

use thiserror::Error;

/// Error type for store, handle, merge and poller operations
#[derive(Error, Debug)]
pub enum Error {
    /// The resource does not exist in the store
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Create was rejected because the resource already exists
    #[error("{resource} already exists")]
    AlreadyExists { resource: String },

    /// The presented concurrency token is not the document's current token
    #[error("conflict writing {resource}: token {token} is stale")]
    Conflict { resource: String, token: String },

    /// Network or server-side failure that may succeed on retry
    #[error("transient error talking to the store: {0}")]
    TransientNetwork(String),

    /// A wait did not observe its condition before the deadline
    #[error(
        "timed out after {waited:?} waiting for {resource} to {condition} (last phase: {}, last message: {})",
        .last_phase.as_deref().unwrap_or("<none>"),
        .last_message.as_deref().unwrap_or("<none>")
    )]
    Timeout {
        resource: String,
        condition: String,
        waited: Duration,
        last_phase: Option<String>,
        last_message: Option<String>,
    },

    /// The resource entered a terminal failure phase while waiting for another phase
    #[error("{resource} entered failure phase {phase} while waiting for {target}: {}", .message.as_deref().unwrap_or("<no message>"))]
    PhaseFailed {
        resource: String,
        target: String,
        phase: String,
        message: Option<String>,
    },

    /// Client-side merge kept conflicting until the attempt ceiling
    #[error("gave up merging {resource} after {attempts} conflicting attempts")]
    MergeExhausted { resource: String, attempts: u32 },

    /// The resource was deleted by someone else while being updated
    #[error("{resource} was deleted concurrently; refusing to recreate it")]
    ResourceVanished { resource: String },

    /// Operation requires a store-confirmed handle
    #[error("{resource} is not bound to a stored document")]
    Unbound { resource: String },

    /// The handle was used after its resource was deleted
    #[error("handle for {resource} was retired by a delete")]
    HandleRetired { resource: String },

    /// The store returned a document belonging to a different resource
    #[error("store returned {found} for handle {resource}")]
    IdentityMismatch { resource: String, found: String },

    /// The store returned a document without a version marker
    #[error("store returned {resource} without a resource version")]
    MissingToken { resource: String },

    /// Invalid status message pattern
    #[error("invalid message pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Kubernetes API error that is not otherwise classified
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if this error may go away by retrying the same call
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }
}

/// Result type alias for resource synchronization
pub type Result<T> = std::result::Result<T, Error>;
