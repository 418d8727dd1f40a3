use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gingersnap_api::{labels, Cache, ConditionStatus, HasConditions, READY};
use gingersnap_operator::{Driver, OperatorConfig};
use gingersnap_reconcile::{ApplyParams, ListQuery, ObjectKey, ObjectStore, RemoteError};
use gingersnap_test_utils::{
    clustered_cache, local_cache, redis_cache, secret, store_with_server_defaults, with_secret_source,
    InMemoryStore, Operation,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::DynamicObject;
use pretty_assertions::assert_eq;
use serde_json::Value;

/// A store whose every call stays pending forever
struct HangingStore;

#[async_trait]
impl ObjectStore for HangingStore {
    async fn get(&self, _: &ObjectKey) -> Result<Option<DynamicObject>, RemoteError> {
        pending().await
    }

    async fn create(&self, _: &ObjectKey, _: &DynamicObject) -> Result<DynamicObject, RemoteError> {
        pending().await
    }

    async fn patch(&self, _: &ObjectKey, _: &Value) -> Result<DynamicObject, RemoteError> {
        pending().await
    }

    async fn patch_status(&self, _: &ObjectKey, _: &Value) -> Result<DynamicObject, RemoteError> {
        pending().await
    }

    async fn apply(&self, _: &ObjectKey, _: &Value, _: &ApplyParams) -> Result<DynamicObject, RemoteError> {
        pending().await
    }

    async fn list(&self, _: &ListQuery) -> Result<Vec<DynamicObject>, RemoteError> {
        pending().await
    }

    async fn delete(&self, _: &ObjectKey) -> Result<(), RemoteError> {
        pending().await
    }
}

fn driver(store: &Arc<InMemoryStore>) -> Driver {
    Driver::new(store.clone(), OperatorConfig::default())
}

fn assert_backend_child(meta: &ObjectMeta, cache: &Cache) {
    let set = meta.labels.clone().unwrap_or_default();
    assert_eq!(set.get(labels::COMPONENT).map(String::as_str), Some("cache-backend"));
    assert_eq!(set.get(labels::INSTANCE).map(String::as_str), Some("airports"));

    let owners = meta.owner_references.clone().unwrap_or_default();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "Cache");
    assert_eq!(Some(&owners[0].uid), cache.metadata.uid.as_ref());
    assert_eq!(owners[0].controller, Some(true));
}

#[tokio::test]
async fn test_local_cache_end_to_end() {
    let store = Arc::new(InMemoryStore::new());
    let cache = store.seed(&local_cache("airports", "ns"));

    let result = driver(&store).reconcile::<Cache>("ns", "airports").await;
    assert!(!result.retry, "unexpected retry: {:?}", result.error);

    let service: Service = store.fetch("ns", "airports").unwrap();
    let config: ConfigMap = store.fetch("ns", "airports").unwrap();
    let deployment: Deployment = store.fetch("ns", "airports").unwrap();
    assert_backend_child(&service.metadata, &cache);
    assert_backend_child(&config.metadata, &cache);
    assert_backend_child(&deployment.metadata, &cache);

    assert_eq!(deployment.spec.unwrap().replicas, Some(0));
    assert!(config.data.unwrap().contains_key("infinispan.xml"));
    assert_eq!(store.count::<Service>(), 1, "no discovery service for LOCAL");

    let cache: Cache = store.fetch("ns", "airports").unwrap();
    assert!(cache.is_ready());
}

#[tokio::test]
async fn test_converged_cache_writes_nothing() {
    let store = Arc::new(InMemoryStore::new());
    store.seed(&local_cache("airports", "ns"));
    let driver = driver(&store);
    driver.reconcile::<Cache>("ns", "airports").await;

    store.reset_stats();
    let result = driver.reconcile::<Cache>("ns", "airports").await;

    assert!(!result.retry);
    assert_eq!(store.stats().calls, 0);
    assert_eq!(store.stats().mutations, 0);
}

#[tokio::test]
async fn test_cluster_topology_defaults() {
    let store = Arc::new(InMemoryStore::new());
    store.seed(&clustered_cache("airports", "ns", None));

    let result = driver(&store).reconcile::<Cache>("ns", "airports").await;
    assert!(!result.retry);

    let deployment: Deployment = store.fetch("ns", "airports").unwrap();
    assert_eq!(deployment.spec.unwrap().replicas, Some(1));

    let discovery: Service = store.fetch("ns", "airports-discovery").unwrap();
    let spec = discovery.spec.unwrap();
    assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
    assert_eq!(spec.publish_not_ready_addresses, Some(true));

    let config: ConfigMap = store.fetch("ns", "airports").unwrap();
    assert!(config.data.unwrap()["infinispan.xml"].contains("<transport"));
}

#[tokio::test]
async fn test_redis_backend() {
    let store = Arc::new(InMemoryStore::new());
    store.seed(&redis_cache("airports", "ns"));

    driver(&store).reconcile::<Cache>("ns", "airports").await;

    let config: ConfigMap = store.fetch("ns", "airports").unwrap();
    let data = config.data.unwrap();
    assert!(data.contains_key("redis.conf"));
    assert!(!data.contains_key("infinispan.xml"));

    let service: Service = store.fetch("ns", "airports").unwrap();
    assert_eq!(service.spec.unwrap().ports.unwrap()[0].port, 6379);
}

#[tokio::test]
async fn test_conflict_retries_immediately_without_ready() {
    let store = Arc::new(InMemoryStore::new());
    store.seed(&local_cache("airports", "ns"));
    store.fail_next_for(
        Operation::Create,
        "Service",
        RemoteError::Conflict {
            kind: "Service".into(),
            name: "airports".into(),
            message: "already exists".into(),
        },
    );

    let result = driver(&store).reconcile::<Cache>("ns", "airports").await;

    assert!(result.retry);
    assert_eq!(result.delay, Duration::ZERO);
    assert!(result.error.is_none());
    assert_eq!(store.count::<Deployment>(), 0, "pipeline stopped at the failing step");
    let cache: Cache = store.fetch("ns", "airports").unwrap();
    assert!(cache.condition(READY).is_none());
}

#[tokio::test]
async fn test_server_assigned_port_fields_are_kept() {
    let store = store_with_server_defaults();
    store.seed(&local_cache("airports", "ns"));
    let driver = driver(&store);
    driver.reconcile::<Cache>("ns", "airports").await;

    store.reset_stats();
    driver.reconcile::<Cache>("ns", "airports").await;
    assert_eq!(store.stats().mutations, 0);

    let service: Service = store.fetch("ns", "airports").unwrap();
    let spec = service.spec.unwrap();
    assert_eq!(spec.cluster_ip.as_deref(), Some("10.96.0.17"));
    let port = &spec.ports.unwrap()[0];
    assert_eq!(port.protocol.as_deref(), Some("TCP"));
    assert_eq!(port.target_port, Some(IntOrString::Int(11222)));
}

#[tokio::test]
async fn test_missing_data_source_reports_not_ready() {
    let store = Arc::new(InMemoryStore::new());
    store.seed(&with_secret_source(local_cache("airports", "ns"), "db-credentials"));
    let driver = driver(&store);

    let result = driver.reconcile::<Cache>("ns", "airports").await;
    assert!(result.retry);
    assert!(result.error.is_some());
    assert_eq!(store.count::<Service>(), 0);

    let cache: Cache = store.fetch("ns", "airports").unwrap();
    let ready = cache.condition(READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert!(ready.message.as_deref().unwrap().contains("db-credentials"));

    store.seed(&secret("db-credentials", "ns"));
    let result = driver.reconcile::<Cache>("ns", "airports").await;
    assert!(!result.retry);
    let cache: Cache = store.fetch("ns", "airports").unwrap();
    assert!(cache.is_ready());
    assert_eq!(cache.condition(READY).unwrap().message, None);
}

#[tokio::test]
async fn test_deleted_cache_is_done() {
    let store = Arc::new(InMemoryStore::new());
    let result = driver(&store).reconcile::<Cache>("ns", "gone").await;
    assert!(!result.retry);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_children_collected_with_cache() {
    let store = Arc::new(InMemoryStore::new());
    store.seed(&clustered_cache("airports", "ns", Some(3)));
    driver(&store).reconcile::<Cache>("ns", "airports").await;
    assert_eq!(store.count::<Service>(), 2);

    store.request_delete::<Cache>("ns", "airports");
    store.collect_garbage();

    assert_eq!(store.count::<Service>(), 0);
    assert_eq!(store.count::<ConfigMap>(), 0);
    assert_eq!(store.count::<Deployment>(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_store_is_cut_at_the_attempt_deadline() {
    let config = OperatorConfig::default().with_attempt_timeout(Duration::from_secs(1));
    let driver = Driver::new(Arc::new(HangingStore), config);

    let result = tokio::time::timeout(Duration::from_secs(600), driver.reconcile::<Cache>("ns", "airports"))
        .await
        .expect("attempt outlived its deadline");

    assert!(result.retry);
    let error = result.error.expect("deadline is reported");
    assert!(error.is_retryable());
}
