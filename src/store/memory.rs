//! In-memory versioned resource store.
//!
//! Behaves like the Kubernetes API for the operations the sync layer uses:
//! a global resource version bumped on every write, `metadata.generation`
//! bumped on spec changes, merge-patch updates guarded by the version.
//!
//! Besides the `ResourceStore` operations it exposes a controller-side API
//! (`mutate`, `set_phase`, `remove`) that writes without tokens, and fault
//! injection for simulating concurrent writers and flaky networks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jiff::Timestamp;
use serde_json::{Value, json};
use tracing::trace;

use crate::error::{Error, Result};
use crate::resource::{ConcurrencyToken, ResourceDocument, ResourceIdentity, Versioned, merge_patch};
use crate::store::ResourceStore;

/// Store operations, for fault injection and the write log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Create,
    Patch,
    Delete,
}

/// A client-originated write as received by the store
#[derive(Clone, Debug, PartialEq)]
pub struct WriteRecord {
    pub operation: Operation,
    pub identity: ResourceIdentity,
    pub payload: Value,
}

type Interleaved = Box<dyn FnMut(&mut ResourceDocument) + Send>;

struct ConcurrentWriter {
    remaining: u32,
    write: Interleaved,
}

struct Stored {
    document: ResourceDocument,
    version: u64,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<ResourceIdentity, Stored>,
    last_version: u64,
    transient_failures: HashMap<Operation, u32>,
    concurrent_writers: HashMap<ResourceIdentity, ConcurrentWriter>,
    writes: Vec<WriteRecord>,
}

impl Inner {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }

    fn take_fault(&mut self, operation: Operation) -> Result<()> {
        match self.transient_failures.get_mut(&operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(Error::TransientNetwork(format!(
                    "injected failure for {:?}",
                    operation
                )))
            }
            _ => Ok(()),
        }
    }

    /// Commit a new document for `identity`, stamping version and generation.
    fn commit(&mut self, identity: &ResourceIdentity, mut document: ResourceDocument) -> Versioned {
        let version = self.next_version();
        let previous = self.objects.get(identity).map(|s| &s.document);
        let generation = match previous {
            Some(prev) if prev.spec == document.spec => prev.generation().unwrap_or(1),
            Some(prev) => prev.generation().unwrap_or(1) + 1,
            None => 1,
        };
        document.pin_identity(identity);
        document.metadata.generation = Some(generation);
        document.metadata.resource_version = Some(version.to_string());
        self.objects.insert(
            identity.clone(),
            Stored {
                document: document.clone(),
                version,
            },
        );
        Versioned {
            document,
            token: ConcurrencyToken::new(version.to_string()),
        }
    }

    fn current(&self, identity: &ResourceIdentity) -> Result<Versioned> {
        self.objects
            .get(identity)
            .map(|s| Versioned {
                document: s.document.clone(),
                token: ConcurrencyToken::new(s.version.to_string()),
            })
            .ok_or_else(|| Error::NotFound {
                resource: identity.to_string(),
            })
    }

    /// Let a registered concurrent writer get in before the next patch.
    fn run_concurrent_writer(&mut self, identity: &ResourceIdentity) {
        let Some(writer) = self.concurrent_writers.get_mut(identity) else {
            return;
        };
        if writer.remaining == 0 {
            return;
        }
        writer.remaining -= 1;
        let Some(stored) = self.objects.get(identity) else {
            return;
        };
        let mut document = stored.document.clone();
        (writer.write)(&mut document);
        self.commit(identity, document);
        trace!(resource = %identity, "Concurrent writer interleaved");
    }
}

/// Shared in-memory store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a document without going through the client write path.
    pub fn insert(&self, identity: &ResourceIdentity, document: ResourceDocument) -> ConcurrencyToken {
        self.lock().commit(identity, document).token
    }

    /// Current document and token, if present.
    pub fn snapshot(&self, identity: &ResourceIdentity) -> Option<Versioned> {
        self.lock().current(identity).ok()
    }

    /// Modify a stored document as another actor would (no token check).
    pub fn mutate<F>(&self, identity: &ResourceIdentity, f: F) -> Result<ConcurrencyToken>
    where
        F: FnOnce(&mut ResourceDocument),
    {
        let mut inner = self.lock();
        let mut document = inner.current(identity)?.document;
        f(&mut document);
        Ok(inner.commit(identity, document).token)
    }

    /// Publish a phase the way a controller does: phase, message, transition
    /// time and the generation it was computed for.
    pub fn set_phase(&self, identity: &ResourceIdentity, phase: &str, message: Option<&str>) -> Result<ConcurrencyToken> {
        self.mutate(identity, |doc| {
            doc.status.insert("phase".into(), json!(phase));
            match message {
                Some(message) => doc.status.insert("message".into(), json!(message)),
                None => doc.status.remove("message"),
            };
            doc.status
                .insert("lastTransition".into(), json!(Timestamp::now().to_string()));
            if let Some(generation) = doc.generation() {
                doc.status.insert("observedGeneration".into(), json!(generation));
            }
        })
    }

    /// Delete a document as another actor would.
    pub fn remove(&self, identity: &ResourceIdentity) -> bool {
        self.lock().objects.remove(identity).is_some()
    }

    /// Fail the next `times` calls of `operation` with a transient error.
    pub fn fail_next(&self, operation: Operation, times: u32) {
        self.lock().transient_failures.insert(operation, times);
    }

    /// Run `write` against the stored document right before each of the next
    /// `times` patches of `identity`, so each of those patches races a
    /// concurrent writer and sees a stale token.
    pub fn interleave_writes<F>(&self, identity: &ResourceIdentity, times: u32, write: F)
    where
        F: FnMut(&mut ResourceDocument) + Send + 'static,
    {
        self.lock().concurrent_writers.insert(
            identity.clone(),
            ConcurrentWriter {
                remaining: times,
                write: Box::new(write),
            },
        );
    }

    /// Client writes received so far, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    /// Number of client writes of one kind.
    pub fn write_count(&self, operation: Operation) -> usize {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.operation == operation)
            .count()
    }
}

impl ResourceStore for MemoryStore {
    async fn get(&self, identity: &ResourceIdentity) -> Result<Versioned> {
        let mut inner = self.lock();
        inner.take_fault(Operation::Get)?;
        inner.current(identity)
    }

    async fn create(&self, identity: &ResourceIdentity, document: &ResourceDocument) -> Result<Versioned> {
        let mut inner = self.lock();
        inner.take_fault(Operation::Create)?;
        let payload = document.create_payload(identity);
        inner.writes.push(WriteRecord {
            operation: Operation::Create,
            identity: identity.clone(),
            payload: payload.clone(),
        });
        if inner.objects.contains_key(identity) {
            return Err(Error::AlreadyExists {
                resource: identity.to_string(),
            });
        }
        let document: ResourceDocument = serde_json::from_value(payload)?;
        Ok(inner.commit(identity, document))
    }

    async fn patch(&self, identity: &ResourceIdentity, token: &ConcurrencyToken, patch: &Value) -> Result<Versioned> {
        let mut inner = self.lock();
        inner.take_fault(Operation::Patch)?;
        inner.writes.push(WriteRecord {
            operation: Operation::Patch,
            identity: identity.clone(),
            payload: patch.clone(),
        });
        inner.run_concurrent_writer(identity);

        let current = inner.current(identity)?;
        if current.token != *token {
            return Err(Error::Conflict {
                resource: identity.to_string(),
                token: token.to_string(),
            });
        }

        let mut target = serde_json::to_value(&current.document)?;
        merge_patch::apply(&mut target, patch);
        let document: ResourceDocument = serde_json::from_value(target)?;
        Ok(inner.commit(identity, document))
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<()> {
        let mut inner = self.lock();
        inner.take_fault(Operation::Delete)?;
        inner.writes.push(WriteRecord {
            operation: Operation::Delete,
            identity: identity.clone(),
            payload: Value::Null,
        });
        match inner.objects.remove(identity) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound {
                resource: identity.to_string(),
            }),
        }
    }
}
