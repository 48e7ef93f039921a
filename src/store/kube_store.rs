//! Kubernetes-backed resource store.
//!
//! Uses `DynamicObject` so any custom resource kind can be addressed by a
//! `ResourceKind` value. The concurrency token is `metadata.resourceVersion`;
//! patches carry it as a precondition and the API server answers 409 when it
//! is stale.

use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::{ConcurrencyToken, ResourceDocument, ResourceIdentity, Versioned};
use crate::store::ResourceStore;

/// Field manager name recorded on writes
pub const FIELD_MANAGER: &str = "resource-sync";

/// How to read a 409 from the API server
#[derive(Clone, Copy)]
enum Write<'a> {
    Create,
    Update(&'a ConcurrencyToken),
}

/// Resource store talking to the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Dynamic API scoped to the identity's namespace (or cluster-wide).
    fn api(&self, identity: &ResourceIdentity) -> Api<DynamicObject> {
        let resource = identity.kind().api_resource();
        match identity.namespace() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

/// Split a dynamic object into a document and its resource version.
fn versioned(identity: &ResourceIdentity, object: DynamicObject) -> Result<Versioned> {
    let token = object
        .metadata
        .resource_version
        .clone()
        .map(ConcurrencyToken::new)
        .ok_or_else(|| Error::MissingToken {
            resource: identity.to_string(),
        })?;
    let document: ResourceDocument = serde_json::from_value(serde_json::to_value(object)?)?;
    Ok(Versioned { document, token })
}

/// Map API errors onto the store error taxonomy.
fn classify(identity: &ResourceIdentity, write: Option<Write<'_>>, err: kube::Error) -> Error {
    let resource = identity.to_string();
    match err {
        kube::Error::Api(e) if e.code == 404 => Error::NotFound { resource },
        kube::Error::Api(e) if e.code == 409 => match write {
            Some(Write::Create) => Error::AlreadyExists { resource },
            Some(Write::Update(token)) => Error::Conflict {
                resource,
                token: token.to_string(),
            },
            None => Error::Kube(kube::Error::Api(e)),
        },
        kube::Error::Api(e) if e.code == 429 || e.code >= 500 => {
            Error::TransientNetwork(format!("{} ({})", e.message, e.code))
        }
        kube::Error::Service(e) => Error::TransientNetwork(e.to_string()),
        kube::Error::HyperError(e) => Error::TransientNetwork(e.to_string()),
        other => Error::Kube(other),
    }
}

impl ResourceStore for KubeStore {
    async fn get(&self, identity: &ResourceIdentity) -> Result<Versioned> {
        let object = self
            .api(identity)
            .get(identity.name())
            .await
            .map_err(|e| classify(identity, None, e))?;
        versioned(identity, object)
    }

    async fn create(&self, identity: &ResourceIdentity, document: &ResourceDocument) -> Result<Versioned> {
        let object: DynamicObject = serde_json::from_value(document.create_payload(identity))?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let created = self
            .api(identity)
            .create(&params, &object)
            .await
            .map_err(|e| classify(identity, Some(Write::Create), e))?;
        debug!(resource = %identity, "Created resource");
        versioned(identity, created)
    }

    async fn patch(&self, identity: &ResourceIdentity, token: &ConcurrencyToken, patch: &Value) -> Result<Versioned> {
        let mut body = patch.clone();
        if let Value::Object(map) = &mut body {
            let metadata = map.entry("metadata").or_insert_with(|| json!({}));
            if let Value::Object(metadata) = metadata {
                metadata.insert("resourceVersion".into(), json!(token.as_str()));
            }
        }
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let patched = self
            .api(identity)
            .patch(identity.name(), &params, &Patch::Merge(&body))
            .await
            .map_err(|e| classify(identity, Some(Write::Update(token)), e))?;
        versioned(identity, patched)
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<()> {
        self.api(identity)
            .delete(identity.name(), &DeleteParams::default())
            .await
            .map_err(|e| classify(identity, None, e))?;
        debug!(resource = %identity, "Deleted resource");
        Ok(())
    }
}
