//! Data model for synchronized resources.
//!
//! - `identity`: immutable keys (`ResourceKind`, `ResourceIdentity`)
//! - `document`: the cached document and its concurrency token
//! - `phase`: phase enums and status observations published by controllers
//! - `merge_patch`: JSON merge patch (RFC 7386) construction and application

pub mod document;
pub mod identity;
pub mod merge_patch;
pub mod phase;

pub use document::{ConcurrencyToken, ResourceDocument, Versioned};
pub use identity::{ResourceIdentity, ResourceKind};
pub use phase::{Phase, PhaseObservation, StandardPhase};
