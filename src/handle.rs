//! Local, possibly stale mirror of one remote resource.
//!
//! A `ResourceHandle` caches the last document read from or written to the
//! store together with its concurrency token. Callers edit `spec` and
//! `metadata` in memory and push them with `create`/`patch` (or through the
//! merge engine). `status` is only ever refreshed from the store.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::resource::{
    ConcurrencyToken, Phase, PhaseObservation, ResourceDocument, ResourceIdentity, Versioned,
};
use crate::store::ResourceStore;

/// Default window after which an auto-reloading handle refreshes before a read
pub const DEFAULT_AUTO_RELOAD_PERIOD: Duration = Duration::from_secs(2);

/// Whether the handle mirrors a store-confirmed document
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingState {
    /// Never confirmed to exist remotely (new, or deleted)
    Unbound,
    /// Mirrors a stored document and holds its token
    Bound,
}

/// Staleness policy for reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReloadPolicy {
    /// Reload before a read when the last sync is older than this
    pub period: Option<Duration>,
}

impl ReloadPolicy {
    /// Never reload implicitly.
    pub fn manual() -> Self {
        Self { period: None }
    }

    /// Reload when the cached copy is older than `period`.
    pub fn every(period: Duration) -> Self {
        Self {
            period: Some(period),
        }
    }
}

/// Handle on one remote resource.
///
/// Not meant to be shared between concurrent actors; give each actor its own
/// handle.
pub struct ResourceHandle<S> {
    store: S,
    identity: ResourceIdentity,
    document: ResourceDocument,
    /// Last store-confirmed document, matching `token`
    baseline: Option<ResourceDocument>,
    token: Option<ConcurrencyToken>,
    binding: BindingState,
    token_stale: bool,
    retired: bool,
    last_sync: Option<Instant>,
    reload: ReloadPolicy,
}

impl<S: ResourceStore> ResourceHandle<S> {
    /// Handle for a resource that should exist with the given desired spec.
    pub fn new(store: S, identity: ResourceIdentity, spec: Map<String, Value>) -> Self {
        let document = ResourceDocument::with_spec(&identity, spec);
        Self::from_document(store, identity, document)
    }

    /// Handle for an existing resource, to be populated by `load`.
    pub fn existing(store: S, identity: ResourceIdentity) -> Self {
        let document = ResourceDocument::for_identity(&identity);
        Self::from_document(store, identity, document)
    }

    /// Handle seeded with a full desired document. Name and namespace are
    /// always taken from `identity`.
    pub fn from_document(store: S, identity: ResourceIdentity, mut document: ResourceDocument) -> Self {
        document.pin_identity(&identity);
        document.status.clear();
        Self {
            store,
            identity,
            document,
            baseline: None,
            token: None,
            binding: BindingState::Unbound,
            token_stale: false,
            retired: false,
            last_sync: None,
            reload: ReloadPolicy::default(),
        }
    }

    /// Set the staleness policy for async reads.
    pub fn with_reload_policy(mut self, reload: ReloadPolicy) -> Self {
        self.reload = reload;
        self
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn binding(&self) -> BindingState {
        self.binding
    }

    pub fn is_bound(&self) -> bool {
        self.binding == BindingState::Bound
    }

    /// Token of the last store-confirmed document.
    pub fn token(&self) -> Option<&ConcurrencyToken> {
        self.token.as_ref()
    }

    /// A patch was rejected since the last sync; `load` before writing again.
    pub fn token_is_stale(&self) -> bool {
        self.token_stale
    }

    /// The handle's resource was deleted through it.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Time since the handle last synced with the store.
    pub fn since_last_sync(&self) -> Option<Duration> {
        self.last_sync.map(|at| at.elapsed())
    }

    // ------------------------------------------------------------------
    // Cached access (no I/O)
    // ------------------------------------------------------------------

    /// Cached document, without applying the reload policy.
    pub fn document(&self) -> &ResourceDocument {
        &self.document
    }

    pub fn spec(&self) -> &Map<String, Value> {
        &self.document.spec
    }

    pub fn spec_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.document.spec
    }

    /// Set one top-level spec field.
    pub fn set_spec_field(&mut self, key: impl Into<String>, value: Value) {
        self.document.spec.insert(key.into(), value);
    }

    pub fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.document.labels_mut()
    }

    pub fn annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.document.annotations_mut()
    }

    // ------------------------------------------------------------------
    // Policy-aware reads
    // ------------------------------------------------------------------

    /// Cached document, reloaded first if the reload policy says it is stale.
    pub async fn read(&mut self) -> Result<&ResourceDocument> {
        self.reload_if_needed().await?;
        Ok(&self.document)
    }

    /// Phase fields of `status`, honoring the reload policy.
    pub async fn observe_phase(&mut self) -> Result<PhaseObservation> {
        Ok(self.read().await?.phase_observation())
    }

    /// Parsed `status.phase`, honoring the reload policy.
    pub async fn phase<P: Phase>(&mut self) -> Result<Option<P>> {
        Ok(self.observe_phase().await?.phase_as())
    }

    async fn reload_if_needed(&mut self) -> Result<()> {
        let Some(period) = self.reload.period else {
            return Ok(());
        };
        if !self.is_bound() {
            return Ok(());
        }
        let stale = self.last_sync.is_none_or(|at| at.elapsed() > period);
        if stale {
            self.load().await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Store operations
    // ------------------------------------------------------------------

    fn ensure_active(&self) -> Result<()> {
        if self.retired {
            return Err(Error::HandleRetired {
                resource: self.identity.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_bound(&self) -> Result<&ConcurrencyToken> {
        self.ensure_active()?;
        match (&self.binding, &self.token) {
            (BindingState::Bound, Some(token)) => Ok(token),
            _ => Err(Error::Unbound {
                resource: self.identity.to_string(),
            }),
        }
    }

    /// Adopt a store-confirmed document.
    fn bind(&mut self, versioned: Versioned) -> Result<()> {
        let Versioned { document, token } = versioned;
        if !self.identity.matches(document.name(), document.namespace()) {
            return Err(Error::IdentityMismatch {
                resource: self.identity.to_string(),
                found: format!(
                    "{}/{}",
                    document.namespace().unwrap_or("-"),
                    document.name().unwrap_or("-")
                ),
            });
        }
        self.baseline = Some(document.clone());
        self.document = document;
        self.token = Some(token);
        self.binding = BindingState::Bound;
        self.token_stale = false;
        self.last_sync = Some(Instant::now());
        Ok(())
    }

    /// The store no longer has the resource.
    fn unbind(&mut self) {
        self.binding = BindingState::Unbound;
        self.token = None;
        self.baseline = None;
        self.token_stale = false;
    }

    /// Read the resource from the store, replacing the cached document.
    ///
    /// On `NotFound` the handle becomes unbound but keeps local edits.
    pub async fn load(&mut self) -> Result<()> {
        self.ensure_active()?;
        match self.store.get(&self.identity).await {
            Ok(versioned) => {
                self.bind(versioned)?;
                debug!(resource = %self.identity, token = ?self.token, "Loaded resource");
                Ok(())
            }
            Err(e) => {
                if e.is_not_found() {
                    self.unbind();
                }
                Err(e)
            }
        }
    }

    /// Create the resource from the cached document.
    ///
    /// On `AlreadyExists` the handle is left untouched.
    pub async fn create(&mut self) -> Result<()> {
        self.ensure_active()?;
        let created = self.store.create(&self.identity, &self.document).await?;
        self.bind(created)?;
        info!(resource = %self.identity, "Created resource");
        Ok(())
    }

    /// Push spec and metadata edits with the current token.
    ///
    /// On `Conflict` the handle stays bound but its token is marked stale.
    pub async fn patch(&mut self) -> Result<()> {
        let token = self.ensure_bound()?.clone();
        let payload = self.document.patch_payload(self.baseline.as_ref());
        match self.store.patch(&self.identity, &token, &payload).await {
            Ok(patched) => {
                self.bind(patched)?;
                debug!(resource = %self.identity, token = ?self.token, "Patched resource");
                Ok(())
            }
            Err(e) => {
                if e.is_conflict() {
                    self.token_stale = true;
                } else if e.is_not_found() {
                    self.unbind();
                }
                Err(e)
            }
        }
    }

    /// Delete the resource. The handle is retired afterwards and only keeps
    /// its identity.
    pub async fn delete(&mut self) -> Result<()> {
        self.ensure_bound()?;
        let result = self.store.delete(&self.identity).await;
        match &result {
            Ok(()) => info!(resource = %self.identity, "Deleted resource"),
            Err(e) if e.is_not_found() => {}
            Err(_) => return result,
        }
        self.unbind();
        self.retired = true;
        self.document = ResourceDocument::for_identity(&self.identity);
        self.last_sync = Some(Instant::now());
        result
    }

    /// Local intent: the fields a client owns or co-owns.
    pub(crate) fn intent(&self) -> Intent {
        Intent {
            spec: self.document.spec.clone(),
            labels: self.document.labels().cloned().unwrap_or_default(),
            annotations: self.document.annotations().cloned().unwrap_or_default(),
        }
    }

    /// Lay a previously captured intent over the freshly loaded document:
    /// spec is replaced, labels and annotations are unioned with local keys
    /// winning.
    pub(crate) fn reapply(&mut self, intent: Intent) {
        self.document.spec = intent.spec;
        if !intent.labels.is_empty() {
            self.document.labels_mut().extend(intent.labels);
        }
        if !intent.annotations.is_empty() {
            self.document.annotations_mut().extend(intent.annotations);
        }
    }
}

/// Snapshot of what the caller wants, taken before a reload.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Intent {
    pub spec: Map<String, Value>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}
