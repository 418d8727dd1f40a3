//! In-memory [`ObjectStore`] emulating the API server behaviours the engine relies on

use std::collections::BTreeMap;

use async_trait::async_trait;
use gingersnap_reconcile::diff::apply_merge;
use gingersnap_reconcile::{ApplyParams, ListQuery, ObjectKey, ObjectStore, RemoteError};
use kube::core::{ApiResource, DynamicObject};
use kube::Resource;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

type Hook = Box<dyn Fn(&mut Value) + Send + Sync>;

/// Store operation, used to target injected faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Create,
    Patch,
    PatchStatus,
    Apply,
    List,
    Delete,
}

/// Write counters
///
/// `calls` counts every write request, `mutations` only the ones that
/// changed stored state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub calls: usize,
    pub mutations: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    api_version: String,
    kind: String,
    namespace: Option<String>,
    name: String,
}

impl Key {
    fn new(resource: &ApiResource, namespace: Option<&str>, name: &str) -> Self {
        Self {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    fn of(key: &ObjectKey) -> Self {
        Self::new(&key.resource, key.namespace.as_deref(), &key.name)
    }
}

struct Fault {
    operation: Operation,
    kind: Option<String>,
    error: RemoteError,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    version: u64,
    hooks: Vec<(String, Hook)>,
    faults: Vec<Fault>,
    stats: WriteStats,
}

impl State {
    fn take_fault(&mut self, operation: Operation, kind: &str) -> Result<(), RemoteError> {
        let position = self
            .faults
            .iter()
            .position(|f| f.operation == operation && f.kind.as_deref().map_or(true, |k| k == kind));
        match position {
            Some(i) => Err(self.faults.remove(i).error),
            None => Ok(()),
        }
    }

    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn insert_new(&mut self, key: Key, mut value: Value) -> Value {
        value["apiVersion"] = json!(key.api_version);
        value["kind"] = json!(key.kind);
        let version = self.next_version();
        let meta = &mut value["metadata"];
        meta["name"] = json!(key.name);
        if let Some(ns) = &key.namespace {
            meta["namespace"] = json!(ns);
        }
        meta["uid"] = json!(uuid::Uuid::new_v4().to_string());
        meta["creationTimestamp"] = json!(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        meta["resourceVersion"] = json!(version);
        if let Some(map) = meta.as_object_mut() {
            map.remove("deletionTimestamp");
        }
        for (kind, hook) in &self.hooks {
            if *kind == key.kind {
                hook(&mut value);
            }
        }
        self.objects.insert(key, value.clone());
        value
    }

    fn current(&self, key: &ObjectKey) -> Result<Value, RemoteError> {
        self.objects.get(&Key::of(key)).cloned().ok_or_else(|| RemoteError::NotFound {
            kind: key.resource.kind.clone(),
            name: key.name.clone(),
        })
    }

    fn commit(&mut self, key: &ObjectKey, current: &Value, mut next: Value) -> Value {
        if next == *current {
            return next;
        }
        next["metadata"]["resourceVersion"] = json!(self.next_version());
        self.stats.mutations += 1;
        self.stats.updates += 1;
        if is_deleting(&next) && !has_finalizers(&next) {
            self.objects.remove(&Key::of(key));
            self.stats.deletes += 1;
        } else {
            self.objects.insert(Key::of(key), next.clone());
        }
        next
    }
}

fn is_deleting(value: &Value) -> bool {
    !value["metadata"]["deletionTimestamp"].is_null()
}

fn has_finalizers(value: &Value) -> bool {
    value["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|f| !f.is_empty())
}

fn check_version(key: &ObjectKey, current: &Value, patch: &Value) -> Result<(), RemoteError> {
    match patch["metadata"]["resourceVersion"].as_str() {
        Some(expected) if current["metadata"]["resourceVersion"].as_str() != Some(expected) => {
            Err(RemoteError::Conflict {
                kind: key.resource.kind.clone(),
                name: key.name.clone(),
                message: "the object has been modified; please apply your changes to the latest version".into(),
            })
        }
        _ => Ok(()),
    }
}

fn without_version(patch: &Value) -> Value {
    let mut patch = patch.clone();
    if let Some(meta) = patch.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("resourceVersion");
    }
    patch
}

fn to_dynamic(value: Value) -> Result<DynamicObject, RemoteError> {
    Ok(serde_json::from_value(value)?)
}

fn matches_selector(value: &Value, selector: &str) -> bool {
    let labels = &value["metadata"]["labels"];
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels[k].as_str() == Some(v),
            None => !labels[term].is_null(),
        })
}

/// Thread-safe in-memory object store
///
/// Emulates optimistic concurrency on `resourceVersion`, server-assigned
/// `uid`/`creationTimestamp`, finalizer-aware deletion, the status
/// subresource, label-selector lists and server-side apply as a merge.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` on every created object of `kind`, as the server would fill defaults
    pub fn on_create(&self, kind: &str, hook: impl Fn(&mut Value) + Send + Sync + 'static) {
        self.state.lock().hooks.push((kind.to_string(), Box::new(hook)));
    }

    /// Fail the next `operation` on any kind with `error`
    pub fn fail_next(&self, operation: Operation, error: RemoteError) {
        self.state.lock().faults.push(Fault {
            operation,
            kind: None,
            error,
        });
    }

    /// Fail the next `operation` on `kind` with `error`
    pub fn fail_next_for(&self, operation: Operation, kind: &str, error: RemoteError) {
        self.state.lock().faults.push(Fault {
            operation,
            kind: Some(kind.to_string()),
            error,
        });
    }

    /// Write counters since creation or the last reset
    #[must_use]
    pub fn stats(&self) -> WriteStats {
        self.state.lock().stats
    }

    /// Zero the write counters
    pub fn reset_stats(&self) {
        self.state.lock().stats = WriteStats::default();
    }

    /// Store `object` as if created by someone else; returns the stored form
    ///
    /// # Panics
    /// When `object` does not serialize.
    pub fn seed<K>(&self, object: &K) -> K
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        let resource = ApiResource::erase::<K>(&());
        let meta = object.meta();
        let key = Key::new(
            &resource,
            meta.namespace.as_deref(),
            meta.name.as_deref().unwrap_or_default(),
        );
        let value = serde_json::to_value(object).expect("seed object serializes");
        let stored = self.state.lock().insert_new(key, value);
        serde_json::from_value(stored).expect("seed object round-trips")
    }

    /// Fetch a typed object
    ///
    /// # Panics
    /// When the stored object does not decode as `K`.
    #[must_use]
    pub fn fetch<K>(&self, namespace: &str, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let key = Key::new(&ApiResource::erase::<K>(&()), Some(namespace), name);
        self.state
            .lock()
            .objects
            .get(&key)
            .map(|v| serde_json::from_value(v.clone()).expect("stored object decodes"))
    }

    /// Number of stored objects of `K`
    #[must_use]
    pub fn count<K: Resource<DynamicType = ()>>(&self) -> usize {
        let resource = ApiResource::erase::<K>(&());
        self.state
            .lock()
            .objects
            .keys()
            .filter(|k| k.api_version == resource.api_version && k.kind == resource.kind)
            .count()
    }

    /// Delete an object the way a user would: objects with finalizers only get a deletion timestamp
    pub fn request_delete<K: Resource<DynamicType = ()>>(&self, namespace: &str, name: &str) {
        let key = Key::new(&ApiResource::erase::<K>(&()), Some(namespace), name);
        let mut state = self.state.lock();
        let Some(mut value) = state.objects.get(&key).cloned() else {
            return;
        };
        if has_finalizers(&value) {
            value["metadata"]["deletionTimestamp"] =
                json!(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
            value["metadata"]["resourceVersion"] = json!(state.next_version());
            state.objects.insert(key, value);
        } else {
            state.objects.remove(&key);
        }
    }

    /// Remove objects whose owners no longer exist, as the garbage collector would
    pub fn collect_garbage(&self) {
        let mut state = self.state.lock();
        loop {
            let live: Vec<String> = state
                .objects
                .values()
                .filter_map(|v| v["metadata"]["uid"].as_str().map(str::to_string))
                .collect();
            let orphans: Vec<Key> = state
                .objects
                .iter()
                .filter(|(_, v)| {
                    v["metadata"]["ownerReferences"].as_array().is_some_and(|refs| {
                        !refs.is_empty()
                            && refs
                                .iter()
                                .all(|r| r["uid"].as_str().map_or(true, |uid| !live.iter().any(|l| l == uid)))
                    })
                })
                .map(|(k, _)| k.clone())
                .collect();
            if orphans.is_empty() {
                break;
            }
            for key in orphans {
                state.objects.remove(&key);
            }
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, RemoteError> {
        let mut state = self.state.lock();
        state.take_fault(Operation::Get, &key.resource.kind)?;
        state.objects.get(&Key::of(key)).cloned().map(to_dynamic).transpose()
    }

    async fn create(&self, key: &ObjectKey, object: &DynamicObject) -> Result<DynamicObject, RemoteError> {
        let mut state = self.state.lock();
        state.take_fault(Operation::Create, &key.resource.kind)?;
        state.stats.calls += 1;
        if state.objects.contains_key(&Key::of(key)) {
            return Err(RemoteError::Conflict {
                kind: key.resource.kind.clone(),
                name: key.name.clone(),
                message: "already exists".into(),
            });
        }
        let stored = state.insert_new(Key::of(key), serde_json::to_value(object)?);
        state.stats.mutations += 1;
        state.stats.creates += 1;
        to_dynamic(stored)
    }

    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject, RemoteError> {
        let mut state = self.state.lock();
        state.take_fault(Operation::Patch, &key.resource.kind)?;
        state.stats.calls += 1;
        let current = state.current(key)?;
        check_version(key, &current, patch)?;

        let mut body = without_version(patch);
        if let Some(map) = body.as_object_mut() {
            map.remove("status");
        }
        let mut next = current.clone();
        apply_merge(&mut next, &body);
        to_dynamic(state.commit(key, &current, next))
    }

    async fn patch_status(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject, RemoteError> {
        let mut state = self.state.lock();
        state.take_fault(Operation::PatchStatus, &key.resource.kind)?;
        state.stats.calls += 1;
        let current = state.current(key)?;
        check_version(key, &current, patch)?;

        let mut next = current.clone();
        apply_merge(&mut next, &json!({ "status": patch["status"] }));
        to_dynamic(state.commit(key, &current, next))
    }

    async fn apply(
        &self,
        key: &ObjectKey,
        config: &Value,
        _params: &ApplyParams,
    ) -> Result<DynamicObject, RemoteError> {
        let mut state = self.state.lock();
        state.take_fault(Operation::Apply, &key.resource.kind)?;
        state.stats.calls += 1;
        let body = without_version(config);
        match state.objects.get(&Key::of(key)).cloned() {
            None => {
                let stored = state.insert_new(Key::of(key), body);
                state.stats.mutations += 1;
                state.stats.creates += 1;
                to_dynamic(stored)
            }
            Some(current) => {
                let mut next = current.clone();
                apply_merge(&mut next, &body);
                to_dynamic(state.commit(key, &current, next))
            }
        }
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<DynamicObject>, RemoteError> {
        let mut state = self.state.lock();
        state.take_fault(Operation::List, &query.resource.kind)?;
        state
            .objects
            .iter()
            .filter(|(k, _)| k.api_version == query.resource.api_version && k.kind == query.resource.kind)
            .filter(|(k, _)| query.namespace.is_none() || k.namespace == query.namespace)
            .filter(|(_, v)| matches_selector(v, &query.selector))
            .map(|(_, v)| to_dynamic(v.clone()))
            .collect()
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.take_fault(Operation::Delete, &key.resource.kind)?;
        state.stats.calls += 1;
        let current = state.current(key)?;
        if has_finalizers(&current) {
            if !is_deleting(&current) {
                let mut next = current.clone();
                next["metadata"]["deletionTimestamp"] =
                    json!(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
                state.commit(key, &current, next);
            }
        } else {
            state.objects.remove(&Key::of(key));
            state.stats.mutations += 1;
            state.stats.deletes += 1;
        }
        Ok(())
    }
}
