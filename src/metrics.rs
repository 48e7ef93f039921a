//! Prometheus metrics for the sync layer.
//!
//! Provides:
//! - `resource_sync_applies` - apply outcomes by kind
//! - `resource_sync_merge_conflicts` - rejected patches by kind
//! - `resource_sync_poll_errors` - swallowed or fatal read errors while polling
//! - `resource_sync_wait_duration_seconds` - time spent in waits

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// How an apply ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApplyOutcome {
    Created,
    Patched,
    Exhausted,
    Vanished,
    Error,
}

impl std::fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyOutcome::Created => write!(f, "created"),
            ApplyOutcome::Patched => write!(f, "patched"),
            ApplyOutcome::Exhausted => write!(f, "exhausted"),
            ApplyOutcome::Vanished => write!(f, "vanished"),
            ApplyOutcome::Error => write!(f, "error"),
        }
    }
}

/// Labels for per-kind metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct KindLabels {
    pub kind: String,
}

impl EncodeLabelSet for KindLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for apply outcomes
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ApplyLabels {
    pub kind: String,
    pub outcome: String,
}

impl EncodeLabelSet for ApplyLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the merge engine and poller
pub struct SyncMetrics {
    /// Apply outcomes
    pub applies: Family<ApplyLabels, Counter>,
    /// Patches rejected with a stale token
    pub merge_conflicts: Family<KindLabels, Counter>,
    /// Read errors seen while polling
    pub poll_errors: Family<KindLabels, Counter>,
    /// Wait duration histogram
    pub wait_duration_seconds: Family<KindLabels, Histogram>,
    registry: Registry,
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let applies = Family::<ApplyLabels, Counter>::default();
        registry.register(
            "resource_sync_applies",
            "Total number of create-or-update applies by outcome",
            applies.clone(),
        );

        let merge_conflicts = Family::<KindLabels, Counter>::default();
        registry.register(
            "resource_sync_merge_conflicts",
            "Total number of patches rejected with a stale concurrency token",
            merge_conflicts.clone(),
        );

        let poll_errors = Family::<KindLabels, Counter>::default();
        registry.register(
            "resource_sync_poll_errors",
            "Total number of read errors while polling for convergence",
            poll_errors.clone(),
        );

        let wait_duration_seconds = Family::<KindLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.5, 2.0, 12))
        });
        registry.register(
            "resource_sync_wait_duration_seconds",
            "Time spent waiting for resources to converge",
            wait_duration_seconds.clone(),
        );

        Self {
            applies,
            merge_conflicts,
            poll_errors,
            wait_duration_seconds,
            registry,
        }
    }

    fn kind_labels(kind: &str) -> KindLabels {
        KindLabels {
            kind: kind.to_string(),
        }
    }

    /// Record how an apply ended
    pub fn record_apply(&self, kind: &str, outcome: ApplyOutcome) {
        let labels = ApplyLabels {
            kind: kind.to_string(),
            outcome: outcome.to_string(),
        };
        self.applies.get_or_create(&labels).inc();
    }

    /// Record a rejected patch
    pub fn record_conflict(&self, kind: &str) {
        self.merge_conflicts
            .get_or_create(&Self::kind_labels(kind))
            .inc();
    }

    /// Record a read error during a wait
    pub fn record_poll_error(&self, kind: &str) {
        self.poll_errors.get_or_create(&Self::kind_labels(kind)).inc();
    }

    /// Record how long a wait took, successful or not
    pub fn record_wait(&self, kind: &str, duration_secs: f64) {
        self.wait_duration_seconds
            .get_or_create(&Self::kind_labels(kind))
            .observe(duration_secs);
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}
