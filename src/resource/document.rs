//! Cached resource documents and concurrency tokens.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use crate::resource::identity::ResourceIdentity;
use crate::resource::merge_patch;
use crate::resource::phase::PhaseObservation;

/// Opaque version marker issued by the store on every read and write.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConcurrencyToken(String);

impl ConcurrencyToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document together with the token it was read or written at.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned {
    pub document: ResourceDocument,
    pub token: ConcurrencyToken,
}

/// A resource as stored remotely.
///
/// `metadata` is strongly typed and shared between client and controller.
/// `spec` is owned by the client and `status` by the controller; both are
/// schema-free JSON objects.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDocument {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub spec: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub status: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Map<String, Value>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl ResourceDocument {
    /// An empty document carrying only the identity's name and namespace.
    pub fn for_identity(identity: &ResourceIdentity) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(identity.name().to_string()),
                namespace: identity.namespace().map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// A document with the given desired spec.
    pub fn with_spec(identity: &ResourceIdentity, spec: Map<String, Value>) -> Self {
        Self {
            spec,
            ..Self::for_identity(identity)
        }
    }

    /// Force name and namespace to the identity's values.
    pub(crate) fn pin_identity(&mut self, identity: &ResourceIdentity) {
        self.metadata.name = Some(identity.name().to_string());
        self.metadata.namespace = identity.namespace().map(str::to_string);
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// `metadata.generation`, bumped by the store on every spec change.
    pub fn generation(&self) -> Option<i64> {
        self.metadata.generation
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.labels.as_ref()
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.annotations.as_ref()
    }

    pub fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.metadata.labels.get_or_insert_with(BTreeMap::new)
    }

    pub fn annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.metadata.annotations.get_or_insert_with(BTreeMap::new)
    }

    /// Look up a spec value by JSON pointer (e.g. `/security/tls/enabled`).
    pub fn spec_pointer(&self, pointer: &str) -> Option<&Value> {
        lookup(&self.spec, pointer)
    }

    /// Look up a status value by JSON pointer.
    pub fn status_pointer(&self, pointer: &str) -> Option<&Value> {
        lookup(&self.status, pointer)
    }

    /// Phase, message and timing published in `status`.
    pub fn phase_observation(&self) -> PhaseObservation {
        PhaseObservation::from_status(&self.status)
    }

    /// Body for a create request. Never contains `status`.
    pub fn create_payload(&self, identity: &ResourceIdentity) -> Value {
        let mut metadata = Map::new();
        metadata.insert("name".into(), json!(identity.name()));
        if let Some(ns) = identity.namespace() {
            metadata.insert("namespace".into(), json!(ns));
        }
        if let Some(labels) = self.labels() {
            metadata.insert("labels".into(), string_map(labels));
        }
        if let Some(annotations) = self.annotations() {
            metadata.insert("annotations".into(), string_map(annotations));
        }

        json!({
            "apiVersion": identity.kind().api_version(),
            "kind": identity.kind().kind(),
            "metadata": metadata,
            "spec": self.spec,
        })
    }

    /// Merge patch that moves `baseline` to this document's spec, labels and
    /// annotations. Keys missing locally but present in the baseline are
    /// nulled. Never contains `status`.
    pub fn patch_payload(&self, baseline: Option<&ResourceDocument>) -> Value {
        let empty = ResourceDocument::default();
        let base = baseline.unwrap_or(&empty);

        let mut metadata = Map::new();
        for (field, ours, theirs) in [
            ("labels", self.labels(), base.labels()),
            ("annotations", self.annotations(), base.annotations()),
        ] {
            let patch = merge_patch::diff(
                &theirs.map(string_map).unwrap_or_else(|| json!({})),
                &ours.map(string_map).unwrap_or_else(|| json!({})),
            );
            if patch.as_object().is_some_and(|p| !p.is_empty()) {
                metadata.insert(field.into(), patch);
            }
        }

        let mut payload = Map::new();
        if !metadata.is_empty() {
            payload.insert("metadata".into(), Value::Object(metadata));
        }
        payload.insert(
            "spec".into(),
            Value::Object(merge_patch::diff_objects(&base.spec, &self.spec)),
        );
        Value::Object(payload)
    }
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn lookup<'a>(map: &'a Map<String, Value>, pointer: &str) -> Option<&'a Value> {
    let path = pointer.strip_prefix('/')?;
    let (head, rest) = match path.split_once('/') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = map.get(&head.replace("~1", "/").replace("~0", "~"))?;
    match rest {
        Some(rest) => value.pointer(&format!("/{rest}")),
        None => Some(value),
    }
}
