//! Remote object store seam
//!
//! The engine talks to the cluster through [`ObjectStore`], an object-safe
//! trait over untyped [`DynamicObject`]s. [`crate::KubeStore`] is the
//! production implementation; tests substitute an in-memory store or a mock.

use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject};
use serde_json::Value;

#[cfg(test)]
use mockall::automock;

/// Address of one remote object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    /// API resource (group, version, kind, plural)
    pub resource: ApiResource,
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced object
    pub fn namespaced(resource: ApiResource, namespace: &str, name: &str) -> Self {
        Self {
            resource,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.resource.kind, ns, self.name),
            None => write!(f, "{} {}", self.resource.kind, self.name),
        }
    }
}

/// Label-selector list request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// API resource to list
    pub resource: ApiResource,
    /// Namespace, `None` lists across the cluster
    pub namespace: Option<String>,
    /// Equality-based label selector, e.g. `a=b,c=d`
    pub selector: String,
}

/// What server-side apply does when another manager owns a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Reject the apply and report the conflict
    #[default]
    Fail,
    /// Take ownership of the conflicting fields
    Force,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "force" => Ok(Self::Force),
            other => Err(format!("unknown conflict policy '{other}', expected 'fail' or 'force'")),
        }
    }
}

/// Server-side apply parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyParams {
    /// Stable field-manager identity
    pub field_manager: String,
    /// Conflict policy for this manager
    pub conflict_policy: ConflictPolicy,
}

/// Untyped remote object store
///
/// Implementations report failures using [`crate::RemoteError`]; a missing
/// object on `get` is `Ok(None)`, on every other call it is `NotFound`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, crate::RemoteError>;

    /// Create a new object
    async fn create(
        &self,
        key: &ObjectKey,
        object: &DynamicObject,
    ) -> Result<DynamicObject, crate::RemoteError>;

    /// Merge-patch an object; a `metadata.resourceVersion` in the patch is a precondition
    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject, crate::RemoteError>;

    /// Merge-patch the status subresource; same precondition rules as `patch`
    async fn patch_status(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject, crate::RemoteError>;

    /// Server-side apply a declarative configuration
    async fn apply(
        &self,
        key: &ObjectKey,
        config: &Value,
        params: &ApplyParams,
    ) -> Result<DynamicObject, crate::RemoteError>;

    /// List objects matching a label selector
    async fn list(&self, query: &ListQuery) -> Result<Vec<DynamicObject>, crate::RemoteError>;

    /// Delete an object
    async fn delete(&self, key: &ObjectKey) -> Result<(), crate::RemoteError>;
}
