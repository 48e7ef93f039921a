//! Create-or-update against a concurrently reconciled resource.
//!
//! `MergeEngine::apply` converges the remote `spec` and metadata to a handle's
//! local intent. Conflicts are resolved by reloading and re-applying the
//! intent: `spec` is replaced wholesale (the client owns it), labels and
//! annotations are unioned with the freshly loaded ones so keys added by the
//! controller survive. Retries are immediate and bounded by attempt count.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::handle::ResourceHandle;
use crate::metrics::{ApplyOutcome, SyncMetrics};
use crate::store::ResourceStore;

/// Default ceiling on patch attempts per apply
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Retry policy for `MergeEngine::apply`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergePolicy {
    /// Patch attempts before giving up with `MergeExhausted` (minimum 1)
    pub max_attempts: u32,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Successful apply
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The resource did not exist and was created
    Created,
    /// The resource was patched; `attempts` counts patch calls including the
    /// successful one
    Patched { attempts: u32 },
}

/// Create-or-update engine.
#[derive(Clone, Default)]
pub struct MergeEngine {
    policy: MergePolicy,
    metrics: Option<Arc<SyncMetrics>>,
}

impl MergeEngine {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            metrics: None,
        }
    }

    /// Record apply outcomes and conflicts.
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Create the resource if the handle is unbound, otherwise patch it,
    /// reloading and re-merging on every conflict.
    ///
    /// Fails with `MergeExhausted` after `max_attempts` conflicting patches
    /// and with `ResourceVanished` if the resource is deleted underneath.
    /// Transient store errors are returned as-is.
    pub async fn apply<S: ResourceStore>(&self, handle: &mut ResourceHandle<S>) -> Result<Applied> {
        let result = self.create_or_update(handle).await;
        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(Applied::Created) => ApplyOutcome::Created,
                Ok(Applied::Patched { .. }) => ApplyOutcome::Patched,
                Err(Error::MergeExhausted { .. }) => ApplyOutcome::Exhausted,
                Err(Error::ResourceVanished { .. }) => ApplyOutcome::Vanished,
                Err(_) => ApplyOutcome::Error,
            };
            metrics.record_apply(handle.identity().kind().kind(), outcome);
        }
        result
    }

    async fn create_or_update<S: ResourceStore>(&self, handle: &mut ResourceHandle<S>) -> Result<Applied> {
        let mut rebase = if handle.is_bound() {
            handle.token_is_stale()
        } else {
            match handle.create().await {
                Ok(()) => return Ok(Applied::Created),
                Err(Error::AlreadyExists { .. }) => {
                    // No token yet: the first load supplies it.
                    info!(resource = %handle.identity(), "Resource already exists, patching instead");
                    true
                }
                Err(e) => return Err(e),
            }
        };

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            if rebase {
                rebase_on_remote(handle).await?;
            }

            match handle.patch().await {
                Ok(()) => {
                    debug!(resource = %handle.identity(), attempts = attempt + 1, "Applied resource");
                    return Ok(Applied::Patched {
                        attempts: attempt + 1,
                    });
                }
                Err(e) if e.is_conflict() => {
                    attempt += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_conflict(handle.identity().kind().kind());
                    }
                    warn!(
                        resource = %handle.identity(),
                        attempt,
                        max_attempts,
                        "Conflict while patching, reloading and merging"
                    );
                    if attempt >= max_attempts {
                        return Err(Error::MergeExhausted {
                            resource: handle.identity().to_string(),
                            attempts: attempt,
                        });
                    }
                    rebase = true;
                }
                Err(e) if e.is_not_found() => {
                    return Err(vanished(handle));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Reload the handle and lay the caller's intent back on top.
async fn rebase_on_remote<S: ResourceStore>(handle: &mut ResourceHandle<S>) -> Result<()> {
    let intent = handle.intent();
    match handle.load().await {
        Ok(()) => {
            handle.reapply(intent);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            handle.reapply(intent);
            Err(vanished(handle))
        }
        Err(e) => {
            handle.reapply(intent);
            Err(e)
        }
    }
}

fn vanished<S>(handle: &ResourceHandle<S>) -> Error
where
    S: ResourceStore,
{
    warn!(resource = %handle.identity(), "Resource deleted concurrently, not recreating");
    Error::ResourceVanished {
        resource: handle.identity().to_string(),
    }
}
