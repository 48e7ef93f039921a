//! Phases published by remote controllers.
//!
//! Controllers report coarse progress in `status.phase` alongside an optional
//! `status.message`. Which phases count as terminal success or failure is a
//! property of the domain, expressed through the `Phase` trait.

use std::fmt;
use std::str::FromStr;

use jiff::Timestamp;
use serde_json::{Map, Value};

/// A domain phase enum.
pub trait Phase: Clone + PartialEq + fmt::Debug + fmt::Display + FromStr + Send + Sync {
    /// The phase signals that reconciliation failed.
    fn is_terminal_failure(&self) -> bool;

    /// The phase signals that reconciliation finished successfully.
    fn is_terminal_success(&self) -> bool {
        false
    }
}

/// Phases used by MongoDB-style controllers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StandardPhase {
    /// Reconciliation has not finished yet.
    #[default]
    Pending,
    /// The resource is fully reconciled.
    Running,
    /// Reconciliation failed; `status.message` carries the reason.
    Failed,
    /// A spec change was applied without a full rollout.
    Updated,
    /// The feature the resource represents is disabled.
    Disabled,
    /// The requested configuration is not supported.
    Unsupported,
}

impl fmt::Display for StandardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StandardPhase::Pending => write!(f, "Pending"),
            StandardPhase::Running => write!(f, "Running"),
            StandardPhase::Failed => write!(f, "Failed"),
            StandardPhase::Updated => write!(f, "Updated"),
            StandardPhase::Disabled => write!(f, "Disabled"),
            StandardPhase::Unsupported => write!(f, "Unsupported"),
        }
    }
}

impl FromStr for StandardPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(StandardPhase::Pending),
            "Running" => Ok(StandardPhase::Running),
            "Failed" => Ok(StandardPhase::Failed),
            "Updated" => Ok(StandardPhase::Updated),
            "Disabled" => Ok(StandardPhase::Disabled),
            "Unsupported" => Ok(StandardPhase::Unsupported),
            _ => Err(format!("Unknown phase: {}", s)),
        }
    }
}

impl Phase for StandardPhase {
    fn is_terminal_failure(&self) -> bool {
        matches!(self, StandardPhase::Failed)
    }

    fn is_terminal_success(&self) -> bool {
        matches!(self, StandardPhase::Running | StandardPhase::Updated)
    }
}

/// Snapshot of the phase-related fields of `status`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PhaseObservation {
    /// Raw `status.phase`
    pub phase: Option<String>,
    /// `status.message`
    pub message: Option<String>,
    /// Raw `status.lastTransition` (or `status.lastUpdated`)
    pub last_transition: Option<String>,
    /// `status.observedGeneration`
    pub observed_generation: Option<i64>,
}

impl PhaseObservation {
    /// Read the observation from a `status` object.
    pub fn from_status(status: &Map<String, Value>) -> Self {
        let text = |key: &str| status.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            phase: text("phase"),
            message: text("message"),
            last_transition: text("lastTransition").or_else(|| text("lastUpdated")),
            observed_generation: status.get("observedGeneration").and_then(Value::as_i64),
        }
    }

    /// Parse the phase into a domain enum. Unknown phases yield `None`.
    pub fn phase_as<P: Phase>(&self) -> Option<P> {
        self.phase.as_deref().and_then(|p| p.parse().ok())
    }

    /// The last transition as a timestamp, when it is RFC 3339.
    pub fn last_transition_time(&self) -> Option<Timestamp> {
        self.last_transition.as_deref().and_then(|t| t.parse().ok())
    }
}
