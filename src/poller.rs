//! Convergence polling.
//!
//! Blocks until a handle's observed `status` satisfies a condition or the
//! timeout elapses. The poller reloads the handle on every tick and sleeps
//! `poll_interval` between ticks; those sleeps are its only suspension
//! points. A final observation is always made at the deadline before giving
//! up with `Error::Timeout`.
//!
//! Cancellation is by dropping the returned future (e.g. inside
//! `tokio::select!`).

use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use regex::Regex;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::handle::ResourceHandle;
use crate::metrics::SyncMetrics;
use crate::resource::{Phase, PhaseObservation, ResourceDocument, ResourceIdentity};
use crate::store::ResourceStore;

/// Default time budget for a wait
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default delay between two polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Options for a wait
#[derive(Clone, Debug)]
pub struct WaitOptions {
    /// Total time budget
    pub timeout: Duration,
    /// Delay between polls
    pub poll_interval: Duration,
    /// Keep polling through transient read errors
    pub ignore_transient_errors: bool,
    /// Keep polling through terminal-failure phases
    pub ignore_terminal_failures: bool,
    /// Required match at the start of `status.message` once the target phase is reached
    pub message_pattern: Option<Regex>,
    /// Failure messages containing any of these are treated as intermediate
    pub tolerated_failure_messages: Vec<String>,
    /// Skip status computed for an older `metadata.generation`
    pub require_observed_generation: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            ignore_transient_errors: false,
            ignore_terminal_failures: false,
            message_pattern: None,
            tolerated_failure_messages: Vec::new(),
            require_observed_generation: true,
        }
    }
}

impl WaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn ignore_transient_errors(mut self, ignore: bool) -> Self {
        self.ignore_transient_errors = ignore;
        self
    }

    pub fn ignore_terminal_failures(mut self, ignore: bool) -> Self {
        self.ignore_terminal_failures = ignore;
        self
    }

    /// Ride through both transient read errors and failure phases.
    pub fn ignore_errors(self, ignore: bool) -> Self {
        self.ignore_transient_errors(ignore)
            .ignore_terminal_failures(ignore)
    }

    /// Require `status.message` to match `pattern` at its start.
    pub fn with_message_pattern(mut self, pattern: &str) -> Result<Self> {
        self.message_pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Treat failure phases whose message contains `message` as intermediate.
    pub fn tolerate_failure_message(mut self, message: impl Into<String>) -> Self {
        self.tolerated_failure_messages.push(message.into());
        self
    }

    pub fn require_observed_generation(mut self, require: bool) -> Self {
        self.require_observed_generation = require;
        self
    }

    fn message_matches(&self, message: Option<&str>) -> bool {
        let Some(pattern) = &self.message_pattern else {
            return true;
        };
        message
            .and_then(|m| pattern.find(m))
            .is_some_and(|m| m.start() == 0)
    }

    fn is_tolerated(&self, message: Option<&str>) -> bool {
        message.is_some_and(|m| {
            self.tolerated_failure_messages
                .iter()
                .any(|tolerated| m.contains(tolerated.as_str()))
        })
    }
}

/// Status computed for an older generation is not evaluated.
fn is_current(document: &ResourceDocument, observation: &PhaseObservation, options: &WaitOptions) -> bool {
    if !options.require_observed_generation {
        return true;
    }
    match (document.generation(), observation.observed_generation) {
        (Some(generation), Some(observed)) => generation == observed,
        _ => true,
    }
}

fn describe<P: Phase>(targets: &[P]) -> String {
    targets
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Stand-in deadline for timeouts too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + timeout`, saturating to a far-future instant.
fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// When to poll next: one interval from now, never past the deadline.
fn next_poll(poll_interval: Duration, deadline: Instant) -> Instant {
    Instant::now()
        .checked_add(poll_interval)
        .map_or(deadline, |next| next.min(deadline))
}

/// Decide whether a document satisfies a phase wait, keeps it waiting, or
/// fails it.
fn evaluate_phase<P: Phase>(
    identity: &ResourceIdentity,
    document: &ResourceDocument,
    targets: &[P],
    options: &WaitOptions,
) -> Result<Option<P>> {
    let expects_failure = targets.iter().any(Phase::is_terminal_failure);
    evaluate_phase_with(
        identity,
        document,
        &describe(targets),
        |phase| targets.contains(phase),
        expects_failure,
        options,
    )
}

fn evaluate_phase_with<P, F>(
    identity: &ResourceIdentity,
    document: &ResourceDocument,
    target: &str,
    is_target: F,
    expects_failure: bool,
    options: &WaitOptions,
) -> Result<Option<P>>
where
    P: Phase,
    F: Fn(&P) -> bool,
{
    let observation = document.phase_observation();
    if !is_current(document, &observation, options) {
        debug!(
            resource = %identity,
            generation = ?document.generation(),
            observed_generation = ?observation.observed_generation,
            "Status not yet observed for current generation"
        );
        return Ok(None);
    }
    let Some(phase) = observation.phase_as::<P>() else {
        return Ok(None);
    };

    if is_target(&phase) {
        if options.message_matches(observation.message.as_deref()) {
            return Ok(Some(phase));
        }
        debug!(resource = %identity, %phase, message = ?observation.message, "Phase reached but message does not match");
        return Ok(None);
    }

    if phase.is_terminal_failure() && !expects_failure {
        if options.ignore_terminal_failures || options.is_tolerated(observation.message.as_deref()) {
            debug!(resource = %identity, %phase, message = ?observation.message, "Riding through failure phase");
            return Ok(None);
        }
        return Err(Error::PhaseFailed {
            resource: identity.to_string(),
            target: target.to_string(),
            phase: phase.to_string(),
            message: observation.message,
        });
    }
    Ok(None)
}

/// Waits for remote convergence.
#[derive(Clone, Default)]
pub struct ConvergencePoller {
    metrics: Option<Arc<SyncMetrics>>,
}

impl ConvergencePoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record wait durations and poll errors.
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Poll until `check` returns `Some`, fails, or the timeout elapses.
    async fn poll<S, T, F>(
        &self,
        handle: &mut ResourceHandle<S>,
        condition: &str,
        options: &WaitOptions,
        mut check: F,
    ) -> Result<T>
    where
        S: ResourceStore,
        F: FnMut(&ResourceIdentity, &ResourceDocument) -> Result<Option<T>>,
    {
        let kind = handle.identity().kind().kind().to_string();
        let start = Instant::now();
        let deadline = deadline_after(start, options.timeout);
        let mut last: Option<PhaseObservation> = None;

        let result = loop {
            let final_check = Instant::now() >= deadline;

            match handle.load().await {
                Ok(()) => {
                    let observation = handle.document().phase_observation();
                    debug!(
                        resource = %handle.identity(),
                        phase = ?observation.phase,
                        message = ?observation.message,
                        "Polled resource"
                    );
                    last = Some(observation);
                    match check(handle.identity(), handle.document()) {
                        Ok(Some(value)) => break Ok(value),
                        Ok(None) => {}
                        Err(e) => break Err(e),
                    }
                }
                Err(e) if e.is_transient() && options.ignore_transient_errors => {
                    self.record_poll_error(&kind);
                    warn!(resource = %handle.identity(), error = %e, "Transient error while polling, continuing");
                }
                Err(e) => {
                    self.record_poll_error(&kind);
                    break Err(e);
                }
            }

            if final_check {
                let last = last.unwrap_or_default();
                break Err(Error::Timeout {
                    resource: handle.identity().to_string(),
                    condition: condition.to_string(),
                    waited: start.elapsed(),
                    last_phase: last.phase,
                    last_message: last.message,
                });
            }
            sleep_until(next_poll(options.poll_interval, deadline)).await;
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_wait(&kind, start.elapsed().as_secs_f64());
        }
        if result.is_ok() {
            info!(resource = %handle.identity(), condition, elapsed = ?start.elapsed(), "Condition reached");
        }
        result
    }

    fn record_poll_error(&self, kind: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_poll_error(kind);
        }
    }

    /// Wait until `status.phase` equals `target`.
    pub async fn wait_for_phase<S, P>(
        &self,
        handle: &mut ResourceHandle<S>,
        target: P,
        options: &WaitOptions,
    ) -> Result<P>
    where
        S: ResourceStore,
        P: Phase,
    {
        self.wait_for_any_phase(handle, &[target], options).await
    }

    /// Wait until `status.phase` equals one of `targets`; returns the one reached.
    pub async fn wait_for_any_phase<S, P>(
        &self,
        handle: &mut ResourceHandle<S>,
        targets: &[P],
        options: &WaitOptions,
    ) -> Result<P>
    where
        S: ResourceStore,
        P: Phase,
    {
        let condition = format!("reach phase {}", describe(targets));
        self.poll(handle, &condition, options, |identity, document| {
            evaluate_phase(identity, document, targets, options)
        })
        .await
    }

    /// Wait until `status.phase` is any phase `P` reports as a terminal
    /// success; returns the one reached.
    pub async fn wait_for_success<S, P>(
        &self,
        handle: &mut ResourceHandle<S>,
        options: &WaitOptions,
    ) -> Result<P>
    where
        S: ResourceStore,
        P: Phase,
    {
        self.poll(handle, "reach a successful phase", options, |identity, document| {
            evaluate_phase_with(
                identity,
                document,
                "a successful phase",
                P::is_terminal_success,
                false,
                options,
            )
        })
        .await
    }

    /// Wait until `predicate` holds for the freshly loaded document.
    pub async fn wait_until<S, F>(
        &self,
        handle: &mut ResourceHandle<S>,
        description: &str,
        mut predicate: F,
        options: &WaitOptions,
    ) -> Result<()>
    where
        S: ResourceStore,
        F: FnMut(&ResourceDocument) -> bool,
    {
        self.poll(handle, description, options, |_, document| {
            Ok(predicate(document).then_some(()))
        })
        .await
    }

    /// Wait until `status.phase` is anything other than `phase`.
    ///
    /// Used after a change to make sure the controller picked it up before
    /// waiting for re-convergence.
    pub async fn abandons_phase<S, P>(
        &self,
        handle: &mut ResourceHandle<S>,
        phase: P,
        timeout: Duration,
    ) -> Result<()>
    where
        S: ResourceStore,
        P: Phase,
    {
        let options = WaitOptions::default().with_timeout(timeout);
        let condition = format!("leave phase {phase}");
        self.poll(handle, &condition, &options, |_, document| {
            let current = document.phase_observation().phase_as::<P>();
            Ok((current.as_ref() != Some(&phase)).then_some(()))
        })
        .await
    }

    /// Wait until `status.lastTransition` differs from `last_transition`.
    pub async fn wait_for_status_transition<S>(
        &self,
        handle: &mut ResourceHandle<S>,
        last_transition: Option<Timestamp>,
        options: &WaitOptions,
    ) -> Result<PhaseObservation>
    where
        S: ResourceStore,
    {
        self.poll(handle, "change status transition time", options, |_, document| {
            let observation = document.phase_observation();
            let changed = observation.last_transition_time() != last_transition;
            Ok(changed.then_some(observation))
        })
        .await
    }

    /// Wait until the store reports the resource gone.
    pub async fn wait_for_deletion<S>(
        &self,
        store: &S,
        identity: &ResourceIdentity,
        options: &WaitOptions,
    ) -> Result<()>
    where
        S: ResourceStore,
    {
        let kind = identity.kind().kind().to_string();
        let start = Instant::now();
        let deadline = deadline_after(start, options.timeout);

        let result = loop {
            let final_check = Instant::now() >= deadline;
            match store.get(identity).await {
                Err(e) if e.is_not_found() => break Ok(()),
                Ok(_) => debug!(resource = %identity, "Resource still present"),
                Err(e) if e.is_transient() && options.ignore_transient_errors => {
                    self.record_poll_error(&kind);
                    warn!(resource = %identity, error = %e, "Transient error while polling, continuing");
                }
                Err(e) => {
                    self.record_poll_error(&kind);
                    break Err(e);
                }
            }
            if final_check {
                break Err(Error::Timeout {
                    resource: identity.to_string(),
                    condition: "be deleted".to_string(),
                    waited: start.elapsed(),
                    last_phase: None,
                    last_message: None,
                });
            }
            sleep_until(next_poll(options.poll_interval, deadline)).await;
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_wait(&kind, start.elapsed().as_secs_f64());
        }
        result
    }
}
