//! Resource kinds and identities.
//!
//! A `ResourceKind` describes a type of custom resource (group, version,
//! kind, plural). A `ResourceIdentity` pins one object of that kind. Both are
//! plain values, so one generic handle type serves every resource kind.

use std::fmt;

use kube::api::{ApiResource, GroupVersionKind};

/// Schema descriptor for a kind of resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    group: String,
    version: String,
    kind: String,
    plural: Option<String>,
}

impl ResourceKind {
    /// Create a kind descriptor. Use an empty group for the core API group.
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            plural: None,
        }
    }

    /// Build a kind from an `apiVersion` string (`group/version` or `version`).
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    /// Override the plural resource name used in API paths.
    pub fn with_plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// `group/version`, or only `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Plural name, derived from the kind when not set explicitly.
    pub fn plural(&self) -> String {
        self.plural
            .clone()
            .unwrap_or_else(|| self.api_resource().plural)
    }

    /// Kube discovery descriptor for dynamic API access.
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.group, &self.version, &self.kind);
        match &self.plural {
            Some(plural) => ApiResource::from_gvk_with_plural(&gvk, plural),
            None => ApiResource::from_gvk(&gvk),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.api_version())
    }
}

/// Immutable key of one resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceIdentity {
    kind: ResourceKind,
    namespace: Option<String>,
    name: String,
}

impl ResourceIdentity {
    /// Identity of a namespaced resource.
    pub fn namespaced(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Identity of a cluster-scoped resource.
    pub fn cluster_scoped(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check that a name/namespace pair read from a document refers to this identity.
    pub fn matches(&self, name: Option<&str>, namespace: Option<&str>) -> bool {
        name == Some(self.name.as_str()) && namespace == self.namespace.as_deref()
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind.kind, self.name),
        }
    }
}
