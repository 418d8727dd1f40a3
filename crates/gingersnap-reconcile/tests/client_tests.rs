use std::collections::BTreeMap;

use gingersnap_reconcile::{OperationResult, RemoteError, Scope};
use gingersnap_test_utils::{client, InMemoryStore};
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn named_config_map(name: &str, namespace: &str) -> ConfigMap {
    let mut cm = ConfigMap::default();
    cm.metadata.name = Some(name.to_string());
    cm.metadata.namespace = Some(namespace.to_string());
    cm
}

fn set_data(cm: &mut ConfigMap, key: &str, value: &str) {
    cm.data
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
}

#[tokio::test]
async fn test_create_then_unchanged() {
    let store = Arc::new(InMemoryStore::new());
    let client = client(&store, "ns");

    let first = client
        .create_or_patch::<ConfigMap, _>("rules", |cm| set_data(cm, "a", "1"))
        .await
        .unwrap();
    let second = client
        .create_or_patch::<ConfigMap, _>("rules", |cm| set_data(cm, "a", "1"))
        .await
        .unwrap();

    assert_eq!(first, OperationResult::Created);
    assert_eq!(second, OperationResult::Unchanged);
    assert_eq!(store.stats().mutations, 1);
}

#[tokio::test]
async fn test_untouched_fields_survive_patch() {
    let store = Arc::new(InMemoryStore::new());
    let mut svc = Service::default();
    svc.metadata.name = Some("cache".to_string());
    svc.metadata.namespace = Some("ns".to_string());
    svc.spec = Some(ServiceSpec {
        cluster_ip: Some("10.0.0.9".to_string()),
        ports: Some(vec![ServicePort {
            port: 11222,
            ..ServicePort::default()
        }]),
        ..ServiceSpec::default()
    });
    store.seed(&svc);

    let result = client(&store, "ns")
        .create_or_patch::<Service, _>("cache", |svc| {
            let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
            spec.selector = Some(BTreeMap::from([("app".to_string(), "cache".to_string())]));
        })
        .await
        .unwrap();
    assert_eq!(result, OperationResult::Updated);

    let live: Service = store.fetch("ns", "cache").unwrap();
    let spec = live.spec.unwrap();
    assert_eq!(spec.cluster_ip.as_deref(), Some("10.0.0.9"));
    assert_eq!(spec.ports.unwrap()[0].port, 11222);
    assert!(spec.selector.is_some());
}

#[tokio::test]
async fn test_owner_reference_injected_once() {
    let store = Arc::new(InMemoryStore::new());
    let owner = store.seed(&named_config_map("owner", "ns"));
    let client = client(&store, "ns").with_owner_of(&owner);

    client
        .create_or_patch::<ConfigMap, _>("child", |cm| set_data(cm, "a", "1"))
        .await
        .unwrap();
    client
        .create_or_patch::<ConfigMap, _>("child", |cm| set_data(cm, "a", "2"))
        .await
        .unwrap();

    let child: ConfigMap = store.fetch("ns", "child").unwrap();
    let refs = child.metadata.owner_references.unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(Some(&refs[0].uid), owner.metadata.uid.as_ref());
    assert_eq!(refs[0].controller, Some(true));
}

#[tokio::test]
async fn test_without_owner_writes_no_reference() {
    let store = Arc::new(InMemoryStore::new());
    let owner = store.seed(&named_config_map("owner", "ns"));
    let shared = client(&store, "ns").with_owner_of(&owner).without_owner();

    shared.apply(&named_config_map("shared", "ns")).await.unwrap();

    let live: ConfigMap = store.fetch("ns", "shared").unwrap();
    assert!(live.metadata.owner_references.is_none());
}

#[tokio::test]
async fn test_concurrent_modification_conflicts() {
    let store = Arc::new(InMemoryStore::new());
    store.seed(&named_config_map("rules", "ns"));
    let racer = store.clone();

    let err = client(&store, "ns")
        .create_or_patch::<ConfigMap, _>("rules", move |cm| {
            // another writer lands between our read and our patch
            racer.seed(&named_config_map("rules", "ns"));
            set_data(cm, "a", "1");
        })
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_apply_reports_created_then_unchanged() {
    let store = Arc::new(InMemoryStore::new());
    let client = client(&store, "ns");
    let mut cm = named_config_map("applied", "ns");
    set_data(&mut cm, "a", "1");

    assert_eq!(client.apply(&cm).await.unwrap(), OperationResult::Created);
    assert_eq!(client.apply(&cm).await.unwrap(), OperationResult::Unchanged);

    set_data(&mut cm, "a", "2");
    assert_eq!(client.apply(&cm).await.unwrap(), OperationResult::Updated);
}

#[tokio::test]
async fn test_list_scopes() {
    let store = Arc::new(InMemoryStore::new());
    for (name, ns) in [("a", "one"), ("b", "two"), ("c", "two")] {
        let mut cm = named_config_map(name, ns);
        cm.metadata.labels = Some(BTreeMap::from([("cache".to_string(), "x".to_string())]));
        store.seed(&cm);
    }
    store.seed(&named_config_map("unlabeled", "two"));
    let selector = BTreeMap::from([("cache".to_string(), "x".to_string())]);

    let client = client(&store, "two");
    let local: Vec<ConfigMap> = client.list(&selector, Scope::Namespace).await.unwrap();
    let all: Vec<ConfigMap> = client.list(&selector, Scope::Cluster).await.unwrap();

    assert_eq!(local.len(), 2);
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    store.seed(&named_config_map("gone", "ns"));
    let client = client(&store, "ns");

    client.delete::<ConfigMap>("gone").await.unwrap();
    client.delete::<ConfigMap>("gone").await.unwrap();
    assert_eq!(store.count::<ConfigMap>(), 0);
}

#[tokio::test]
async fn test_stale_instance_metadata_patch_conflicts() {
    let store = Arc::new(InMemoryStore::new());
    let stale = store.seed(&named_config_map("instance", "ns"));
    let client = client(&store, "ns");

    let labels = BTreeMap::from([("a".to_string(), "b".to_string())]);
    let fresh = client
        .patch_metadata(&stale, &["f".to_string()], &labels)
        .await
        .unwrap();
    assert_eq!(fresh.metadata.finalizers, Some(vec!["f".to_string()]));

    let err = client.patch_metadata(&stale, &[], &labels).await.unwrap_err();
    assert!(matches!(err, RemoteError::Conflict { .. }));
}

#[tokio::test]
async fn test_load_missing_is_not_found() {
    let store = Arc::new(InMemoryStore::new());
    let err = client(&store, "ns").load::<ConfigMap>("missing").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_patch_never_resurrects_deleted_object() {
    let store = Arc::new(InMemoryStore::new());
    let client = client(&store, "ns");
    client
        .create_or_patch::<ConfigMap, _>("rules", |cm| set_data(cm, "a", "1"))
        .await
        .unwrap();
    let live: ConfigMap = client.load("rules").await.unwrap();

    client.delete::<ConfigMap>("rules").await.unwrap();
    let err = client
        .patch(&live, |cm| {
            cm.data.get_or_insert_with(BTreeMap::new).remove("a");
        })
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(store.count::<ConfigMap>(), 0);
}
