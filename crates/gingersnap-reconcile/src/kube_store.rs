//! Kubernetes API server backed object store

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{DynamicObject, TypeMeta};
use serde_json::Value;
use tracing::debug;

use crate::error::RemoteError;
use crate::store::{ApplyParams, ConflictPolicy, ListQuery, ObjectKey, ObjectStore};

/// [`ObjectStore`] over a live cluster
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    /// Wrap a Kubernetes client
    #[must_use]
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, key: &ObjectKey) -> Api<DynamicObject> {
        match &key.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &key.resource),
            None => Api::all_with(self.client.clone(), &key.resource),
        }
    }

    fn map_err(key: &ObjectKey) -> impl Fn(kube::Error) -> RemoteError + '_ {
        move |e| RemoteError::from_kube(e, &key.resource.kind, &key.name)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, RemoteError> {
        self.api(key).get_opt(&key.name).await.map_err(Self::map_err(key))
    }

    async fn create(&self, key: &ObjectKey, object: &DynamicObject) -> Result<DynamicObject, RemoteError> {
        self.api(key)
            .create(&PostParams::default(), object)
            .await
            .map_err(Self::map_err(key))
    }

    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject, RemoteError> {
        self.api(key)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(Self::map_err(key))
    }

    async fn patch_status(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject, RemoteError> {
        self.api(key)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(Self::map_err(key))
    }

    async fn apply(
        &self,
        key: &ObjectKey,
        config: &Value,
        params: &ApplyParams,
    ) -> Result<DynamicObject, RemoteError> {
        let mut pp = PatchParams::apply(&params.field_manager);
        if params.conflict_policy == ConflictPolicy::Force {
            pp = pp.force();
        }
        debug!(object = %key, manager = %params.field_manager, "server-side apply");
        match self.api(key).patch(&key.name, &pp, &Patch::Apply(config)).await {
            Err(kube::Error::Api(response)) if response.code == 409 => Err(RemoteError::OwnershipConflict {
                manager: params.field_manager.clone(),
                name: key.name.clone(),
                message: response.message,
            }),
            other => other.map_err(Self::map_err(key)),
        }
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<DynamicObject>, RemoteError> {
        let api: Api<DynamicObject> = match &query.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &query.resource),
            None => Api::all_with(self.client.clone(), &query.resource),
        };
        let mut params = ListParams::default();
        if !query.selector.is_empty() {
            params = params.labels(&query.selector);
        }
        let list = api
            .list(&params)
            .await
            .map_err(|e| RemoteError::from_kube(e, &query.resource.kind, &query.selector))?;

        // List items come back without apiVersion/kind
        Ok(list
            .items
            .into_iter()
            .map(|mut item| {
                item.types.get_or_insert_with(|| TypeMeta {
                    api_version: query.resource.api_version.clone(),
                    kind: query.resource.kind.clone(),
                });
                item
            })
            .collect())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), RemoteError> {
        self.api(key)
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(Self::map_err(key))
    }
}
