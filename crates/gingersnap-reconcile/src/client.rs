//! Typed remote client
//!
//! Wraps an [`ObjectStore`] with:
//! - typed load / list / delete / status update
//! - `create_or_patch`: load, mutate, diff, patch only what changed
//! - `apply`: server-side apply under a stable field manager
//! - automatic controller owner references on everything it writes
//! - a per-attempt deadline on every call

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;

use crate::diff::merge_diff;
use crate::error::RemoteError;
use crate::store::{ApplyParams, ConflictPolicy, ListQuery, ObjectKey, ObjectStore};

/// Anything the client can read and write
pub trait Object:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<T> Object for T where
    T: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static
{
}

/// Outcome of a write primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// Object did not exist and was created
    Created,
    /// Object existed and was changed
    Updated,
    /// Object already matched; nothing was written
    Unchanged,
}

impl std::fmt::Display for OperationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        })
    }
}

/// Where a list looks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The client's namespace
    Namespace,
    /// Every namespace
    Cluster,
}

/// Typed client scoped to one namespace and, optionally, one owner
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn ObjectStore>,
    namespace: String,
    owner: Option<OwnerReference>,
    apply: ApplyParams,
    deadline: Option<Instant>,
}

impl Client {
    /// Default field manager for server-side apply
    pub const DEFAULT_FIELD_MANAGER: &'static str = "gingersnap-operator";

    /// Create a client for `namespace`
    pub fn new(store: Arc<dyn ObjectStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            owner: None,
            apply: ApplyParams {
                field_manager: Self::DEFAULT_FIELD_MANAGER.to_string(),
                conflict_policy: ConflictPolicy::default(),
            },
            deadline: None,
        }
    }

    /// Same client, other namespace
    #[must_use]
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..self.clone()
        }
    }

    /// Same client, tagging writes with `owner`
    #[must_use]
    pub fn with_owner(&self, owner: OwnerReference) -> Self {
        Self {
            owner: Some(owner),
            ..self.clone()
        }
    }

    /// Same client, tagging writes with a controller reference to `owner`
    ///
    /// Falls back to no owner when `owner` has no uid yet.
    #[must_use]
    pub fn with_owner_of<K: Resource<DynamicType = ()>>(&self, owner: &K) -> Self {
        Self {
            owner: owner.controller_owner_ref(&()),
            ..self.clone()
        }
    }

    /// Same client, writes carry no owner reference
    ///
    /// Used for children shared between several instances.
    #[must_use]
    pub fn without_owner(&self) -> Self {
        Self {
            owner: None,
            ..self.clone()
        }
    }

    /// Same client, server-side apply as `field_manager` with `policy`
    #[must_use]
    pub fn with_field_manager(&self, field_manager: impl Into<String>, policy: ConflictPolicy) -> Self {
        Self {
            apply: ApplyParams {
                field_manager: field_manager.into(),
                conflict_policy: policy,
            },
            ..self.clone()
        }
    }

    /// Same client, every call bounded by `deadline`
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Namespace writes and loads go to
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Owner reference injected into writes
    #[inline]
    #[must_use]
    pub fn owner_reference(&self) -> Option<&OwnerReference> {
        self.owner.as_ref()
    }

    /// Attempt deadline, if any
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Load an object by name
    ///
    /// # Errors
    /// `RemoteError::NotFound` when absent, otherwise the store's failure.
    pub async fn load<K: Object>(&self, name: &str) -> Result<K, RemoteError> {
        let key = self.key::<K>(name);
        match self.bounded(self.store.get(&key)).await? {
            Some(obj) => decode(obj, &key.resource),
            None => Err(not_found(&key)),
        }
    }

    /// Load an object whose kind is only known at runtime
    ///
    /// # Errors
    /// `RemoteError::NotFound` when absent, otherwise the store's failure.
    pub async fn load_dynamic(&self, gvk: &GroupVersionKind, name: &str) -> Result<DynamicObject, RemoteError> {
        let key = ObjectKey::namespaced(ApiResource::from_gvk(gvk), &self.namespace, name);
        self.bounded(self.store.get(&key))
            .await?
            .ok_or_else(|| not_found(&key))
    }

    /// Create the object, or patch the fields `mutate` changes
    ///
    /// `mutate` receives either a default skeleton carrying only name and
    /// namespace, or a copy of the live object. A new object has no
    /// `metadata.resourceVersion`, which mutations can use to decide whether
    /// to initialise fields the server fills in later.
    ///
    /// # Errors
    /// `RemoteError::Conflict` when the object changed since it was loaded.
    pub async fn create_or_patch<K, F>(&self, name: &str, mutate: F) -> Result<OperationResult, RemoteError>
    where
        K: Object + Default,
        F: FnOnce(&mut K),
    {
        let key = self.key::<K>(name);
        let existing = self.bounded(self.store.get(&key)).await?;

        let Some(existing) = existing else {
            let mut object = K::default();
            object.meta_mut().name = Some(name.to_string());
            object.meta_mut().namespace = Some(self.namespace.clone());
            mutate(&mut object);
            self.tag_owner(object.meta_mut());
            let dynamic = encode(&object)?;
            self.bounded(self.store.create(&key, &dynamic)).await?;
            debug!(object = %key, "created");
            return Ok(OperationResult::Created);
        };

        let original: K = decode(existing, &key.resource)?;
        self.patch(&original, mutate).await
    }

    /// Patch the fields `mutate` changes on a previously loaded object
    ///
    /// Never creates: an object deleted since `live` was loaded stays
    /// deleted.
    ///
    /// # Errors
    /// `RemoteError::NotFound` when the object is gone,
    /// `RemoteError::Conflict` when it changed since `live` was loaded.
    pub async fn patch<K, F>(&self, live: &K, mutate: F) -> Result<OperationResult, RemoteError>
    where
        K: Object,
        F: FnOnce(&mut K),
    {
        let key = self.key_for(live);
        let mut desired = live.clone();
        mutate(&mut desired);
        self.tag_owner(desired.meta_mut());

        let Some(mut patch) = merge_diff(&serde_json::to_value(live)?, &serde_json::to_value(&desired)?) else {
            return Ok(OperationResult::Unchanged);
        };
        if let Some(version) = live.resource_version() {
            patch["metadata"]["resourceVersion"] = Value::String(version);
        }
        self.bounded(self.store.patch(&key, &patch)).await?;
        debug!(object = %key, "patched");
        Ok(OperationResult::Updated)
    }

    /// Server-side apply `config`
    ///
    /// # Errors
    /// `RemoteError::OwnershipConflict` when another field manager owns a
    /// field and the conflict policy is [`ConflictPolicy::Fail`].
    pub async fn apply<K: Object>(&self, config: &K) -> Result<OperationResult, RemoteError> {
        let mut config = config.clone();
        let name = config.name_any();
        if config.meta().namespace.is_none() {
            config.meta_mut().namespace = Some(self.namespace.clone());
        }
        self.tag_owner(config.meta_mut());

        let key = self.key::<K>(&name);
        let live_version = self
            .bounded(self.store.get(&key))
            .await?
            .and_then(|live| live.metadata.resource_version);

        let mut body = serde_json::to_value(&config)?;
        if let Some(meta) = body.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("resourceVersion");
            meta.remove("managedFields");
        }
        let applied = self.bounded(self.store.apply(&key, &body, &self.apply)).await?;

        Ok(match live_version {
            None => OperationResult::Created,
            Some(before) if applied.metadata.resource_version.as_deref() == Some(before.as_str()) => {
                OperationResult::Unchanged
            }
            Some(_) => OperationResult::Updated,
        })
    }

    /// List objects matching an equality label selector
    ///
    /// # Errors
    /// The store's failure.
    pub async fn list<K: Object>(
        &self,
        selector: &BTreeMap<String, String>,
        scope: Scope,
    ) -> Result<Vec<K>, RemoteError> {
        let resource = ApiResource::erase::<K>(&());
        let query = ListQuery {
            namespace: match scope {
                Scope::Namespace => Some(self.namespace.clone()),
                Scope::Cluster => None,
            },
            selector: selector
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
            resource,
        };
        self.bounded(self.store.list(&query))
            .await?
            .into_iter()
            .map(|obj| decode(obj, &query.resource))
            .collect()
    }

    /// Delete an object; an absent object counts as deleted
    ///
    /// # Errors
    /// Any failure other than `NotFound`.
    pub async fn delete<K: Object>(&self, name: &str) -> Result<(), RemoteError> {
        let key = self.key::<K>(name);
        match self.bounded(self.store.delete(&key)).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Write the status of `instance`, guarded by its resource version
    ///
    /// # Errors
    /// `RemoteError::Conflict` when `instance` is stale.
    pub async fn update_status<K: Object>(&self, instance: &K) -> Result<K, RemoteError> {
        let key = self.key_for(instance);
        let status = serde_json::to_value(instance)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        let patch = json!({
            "metadata": { "resourceVersion": instance.resource_version() },
            "status": status,
        });
        let updated = self.bounded(self.store.patch_status(&key, &patch)).await?;
        decode(updated, &key.resource)
    }

    /// Replace finalizers and merge labels on `instance`, guarded by its resource version
    ///
    /// # Errors
    /// `RemoteError::Conflict` when `instance` is stale.
    pub async fn patch_metadata<K: Object>(
        &self,
        instance: &K,
        finalizers: &[String],
        labels: &BTreeMap<String, String>,
    ) -> Result<K, RemoteError> {
        let key = self.key_for(instance);
        let patch = json!({
            "metadata": {
                "resourceVersion": instance.resource_version(),
                "finalizers": finalizers,
                "labels": labels,
            }
        });
        let updated = self.bounded(self.store.patch(&key, &patch)).await?;
        decode(updated, &key.resource)
    }

    fn key<K: Object>(&self, name: &str) -> ObjectKey {
        ObjectKey::namespaced(ApiResource::erase::<K>(&()), &self.namespace, name)
    }

    fn key_for<K: Object>(&self, instance: &K) -> ObjectKey {
        let namespace = instance.namespace().unwrap_or_else(|| self.namespace.clone());
        ObjectKey::namespaced(ApiResource::erase::<K>(&()), &namespace, &instance.name_any())
    }

    fn tag_owner(&self, meta: &mut kube::core::ObjectMeta) {
        let Some(owner) = &self.owner else {
            return;
        };
        let refs = meta.owner_references.get_or_insert_with(Vec::new);
        if !refs.iter().any(|r| r.uid == owner.uid) {
            refs.push(owner.clone());
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T, RemoteError>>) -> Result<T, RemoteError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(RemoteError::DeadlineExceeded),
            Some(deadline) => tokio::time::timeout_at(deadline, call)
                .await
                .map_err(|_| RemoteError::DeadlineExceeded)?,
            None => call.await,
        }
    }
}

fn not_found(key: &ObjectKey) -> RemoteError {
    RemoteError::NotFound {
        kind: key.resource.kind.clone(),
        name: key.name.clone(),
    }
}

fn encode<K: Object>(object: &K) -> Result<DynamicObject, RemoteError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

fn decode<K: Object>(mut object: DynamicObject, resource: &ApiResource) -> Result<K, RemoteError> {
    object.types = Some(TypeMeta {
        api_version: resource.api_version.clone(),
        kind: resource.kind.clone(),
    });
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockObjectStore;
    use k8s_openapi::api::core::v1::ConfigMap;
    use std::time::Duration;

    fn live_config_map(version: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "c", "namespace": "ns", "resourceVersion": version, "uid": "u-1"},
            "data": {"k": "v"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_or_patch_sends_resource_version_with_diff() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|_| Ok(Some(live_config_map("41"))));
        store
            .expect_patch()
            .withf(|key, patch| {
                key.name == "c"
                    && patch["metadata"]["resourceVersion"] == "41"
                    && patch["data"] == json!({"k": "w"})
            })
            .times(1)
            .returning(|_, _| Ok(live_config_map("42")));

        let client = Client::new(Arc::new(store), "ns");
        let result = client
            .create_or_patch::<ConfigMap, _>("c", |cm| {
                cm.data.get_or_insert_with(BTreeMap::new).insert("k".into(), "w".into());
            })
            .await
            .unwrap();
        assert_eq!(result, OperationResult::Updated);
    }

    #[tokio::test]
    async fn create_or_patch_skips_write_when_nothing_changed() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|_| Ok(Some(live_config_map("41"))));
        store.expect_patch().never();

        let client = Client::new(Arc::new(store), "ns");
        let result = client
            .create_or_patch::<ConfigMap, _>("c", |cm| {
                cm.data.get_or_insert_with(BTreeMap::new).insert("k".into(), "v".into());
            })
            .await
            .unwrap();
        assert_eq!(result, OperationResult::Unchanged);
    }

    #[tokio::test]
    async fn conflict_is_passed_through() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|_| Ok(Some(live_config_map("41"))));
        store.expect_patch().returning(|key, _| {
            Err(RemoteError::Conflict {
                kind: key.resource.kind.clone(),
                name: key.name.clone(),
                message: "object has been modified".into(),
            })
        });

        let client = Client::new(Arc::new(store), "ns");
        let err = client
            .create_or_patch::<ConfigMap, _>("c", |cm| {
                cm.data = None;
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn delete_of_missing_object_succeeds() {
        let mut store = MockObjectStore::new();
        store.expect_delete().returning(|key| {
            Err(RemoteError::NotFound {
                kind: key.resource.kind.clone(),
                name: key.name.clone(),
            })
        });

        let client = Client::new(Arc::new(store), "ns");
        assert!(client.delete::<ConfigMap>("gone").await.is_ok());
    }

    #[tokio::test]
    async fn expired_deadline_fails_the_call() {
        let mut store = MockObjectStore::new();
        store.expect_get().never();
        store.expect_create().never();

        let client = Client::new(Arc::new(store), "ns")
            .with_deadline(Instant::now() - Duration::from_millis(1));
        let err = client.load::<ConfigMap>("c").await.unwrap_err();
        assert!(matches!(err, RemoteError::DeadlineExceeded));
        assert!(err.is_retryable());

        let err = client
            .create_or_patch::<ConfigMap, _>("c", |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_call_is_cut_at_the_deadline() {
        let client =
            Client::new(Arc::new(MockObjectStore::new()), "ns").with_deadline(Instant::now() + Duration::from_secs(1));

        let hanging = client.bounded(std::future::pending::<Result<(), RemoteError>>());
        let err = tokio::time::timeout(Duration::from_secs(600), hanging)
            .await
            .expect("deadline should fire first")
            .unwrap_err();
        assert!(matches!(err, RemoteError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn patch_of_vanished_object_is_not_found_and_creates_nothing() {
        let mut store = MockObjectStore::new();
        store.expect_create().never();
        store
            .expect_patch()
            .withf(|_, patch| patch["metadata"]["resourceVersion"] == "7")
            .returning(|key, _| {
                Err(RemoteError::NotFound {
                    kind: key.resource.kind.clone(),
                    name: key.name.clone(),
                })
            });
        let client = Client::new(Arc::new(store), "ns");
        let live: ConfigMap = decode(live_config_map("7"), &ApiResource::erase::<ConfigMap>(&())).unwrap();

        let err = client
            .patch(&live, |cm: &mut ConfigMap| {
                cm.data.get_or_insert_with(BTreeMap::new).remove("k");
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn apply_reports_conflicts_from_store() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|_| Ok(Some(live_config_map("3"))));
        store
            .expect_apply()
            .withf(|_, body, params| {
                params.conflict_policy == ConflictPolicy::Fail
                    && params.field_manager == "tester"
                    && body["metadata"].get("resourceVersion").is_none()
            })
            .returning(|key, _, params| {
                Err(RemoteError::OwnershipConflict {
                    manager: params.field_manager.clone(),
                    name: key.name.clone(),
                    message: ".data.k owned by kubectl".into(),
                })
            });

        let client = Client::new(Arc::new(store), "ns").with_field_manager("tester", ConflictPolicy::Fail);
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some("c".into());
        let err = client.apply(&cm).await.unwrap_err();
        assert!(matches!(err, RemoteError::OwnershipConflict { .. }));
    }
}
