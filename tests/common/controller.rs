//! Simulated remote controller for in-memory tests.
//!
//! Runs as a background task against a `MemoryStore`, publishing phases the
//! way a real reconciler does: when `metadata.generation` moves past
//! `status.observedGeneration` it goes `Pending`, works for a while, then
//! goes `Running` and records the generation it reconciled.

use std::time::Duration;

use resource_sync::{MemoryStore, ResourceIdentity};
use tokio::task::JoinHandle;

/// Background controller task. Aborted on drop.
pub struct SimulatedController {
    task: JoinHandle<()>,
}

impl SimulatedController {
    /// Start reconciling `identity`.
    ///
    /// `tick` is how often the controller looks at the resource,
    /// `work` how long it stays `Pending` before reporting `Running`.
    pub fn spawn(store: MemoryStore, identity: ResourceIdentity, tick: Duration, work: Duration) -> Self {
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                let Some(current) = store.snapshot(&identity) else {
                    continue;
                };
                let observation = current.document.phase_observation();
                if observation.observed_generation == current.document.generation() {
                    continue;
                }
                let _ = store.set_phase(&identity, "Pending", Some("Reconciling"));
                tokio::time::sleep(work).await;
                let _ = store.set_phase(&identity, "Running", None);
            }
        });
        Self { task }
    }
}

impl Drop for SimulatedController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Run `f` after `delay` in the background.
pub fn after<F>(delay: Duration, f: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        f();
    })
}
