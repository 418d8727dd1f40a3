use std::sync::Arc;

use gingersnap_api::{
    finalizer, labels, Cache, CacheRule, ConditionStatus, EagerCacheRule, HasConditions, LazyCacheRule,
    ServiceBinding, READY,
};
use gingersnap_operator::{Driver, OperatorConfig};
use gingersnap_reconcile::ReconcileError;
use gingersnap_test_utils::{client, eager_rule, lazy_rule, local_cache, secret, with_secret_source, InMemoryStore};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use pretty_assertions::assert_eq;

fn world() -> (Arc<InMemoryStore>, Cache) {
    let store = Arc::new(InMemoryStore::new());
    store.seed(&secret("db-credentials", "cache-ns"));
    let cache = store.seed(&with_secret_source(local_cache("airports", "cache-ns"), "db-credentials"));
    (store, cache)
}

fn driver(store: &Arc<InMemoryStore>) -> Driver {
    Driver::new(store.clone(), OperatorConfig::default())
}

fn rule_keys(store: &InMemoryStore, config_map: &str) -> Vec<String> {
    store
        .fetch::<ConfigMap>("cache-ns", config_map)
        .and_then(|cm| cm.data)
        .map(|data| data.into_keys().collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_eager_rule_end_to_end() {
    let (store, cache) = world();
    store.seed(&eager_rule("by-id", "apps", &cache));

    let result = driver(&store).reconcile::<EagerCacheRule>("apps", "by-id").await;
    assert!(!result.retry, "unexpected retry: {:?}", result.error);

    let rule: EagerCacheRule = store.fetch("apps", "by-id").unwrap();
    assert!(rule.is_ready());
    assert!(rule.finalizers().contains(&finalizer::<EagerCacheRule>()));
    assert_eq!(rule.labels().get(labels::RULE_CACHE).map(String::as_str), Some("airports"));
    assert_eq!(
        rule.labels().get(labels::RULE_CACHE_NAMESPACE).map(String::as_str),
        Some("cache-ns")
    );

    let rules: ConfigMap = store.fetch("cache-ns", "airports-eager-rules").unwrap();
    let rule_labels = rules.metadata.labels.clone().unwrap_or_default();
    assert_eq!(rule_labels.get(labels::COMPONENT).map(String::as_str), Some("rule-config"));
    assert_eq!(rule_labels.get(labels::INSTANCE).map(String::as_str), Some("airports"));
    let owners = rules.metadata.owner_references.unwrap();
    assert_eq!(owners[0].kind, "Cache");
    assert_eq!(Some(&owners[0].uid), cache.metadata.uid.as_ref());
    let stored: serde_json::Value = serde_json::from_str(&rules.data.unwrap()["apps.by-id"]).unwrap();
    assert_eq!(stored["table_name"], "by-id_table");

    let syncer: Deployment = store.fetch("cache-ns", "airports-db-syncer").unwrap();
    assert_eq!(syncer.metadata.owner_references, None, "shared child has no owner");
    assert_eq!(
        syncer.metadata.labels.unwrap().get(labels::COMPONENT).map(String::as_str),
        Some("db-syncer")
    );
    let container = &syncer.spec.unwrap().template.spec.unwrap().containers[0];
    let env: Vec<_> = container
        .env
        .clone()
        .unwrap()
        .into_iter()
        .map(|e| (e.name, e.value.unwrap_or_default()))
        .collect();
    assert!(env.contains(&("GINGERSNAP_K8S_RULE_CONFIG_MAP".to_string(), "airports-eager-rules".to_string())));

    let db: ServiceBinding = store.fetch("cache-ns", "airports-db-syncer-db").unwrap();
    assert_eq!(db.spec.service.kind, "Secret");
    assert_eq!(db.spec.service.name, "db-credentials");
    assert_eq!(db.spec.type_.as_deref(), Some("postgresql"));
    assert!(store.fetch::<ServiceBinding>("cache-ns", "airports-db-syncer-cache").is_some());
}

#[tokio::test]
async fn test_converged_rule_writes_nothing() {
    let (store, cache) = world();
    store.seed(&eager_rule("by-id", "apps", &cache));
    let driver = driver(&store);
    driver.reconcile::<EagerCacheRule>("apps", "by-id").await;

    store.reset_stats();
    let result = driver.reconcile::<EagerCacheRule>("apps", "by-id").await;

    assert!(!result.retry);
    assert_eq!(store.stats().mutations, 0);
}

#[tokio::test]
async fn test_shared_db_syncer_outlives_all_but_last_rule() {
    let (store, cache) = world();
    store.seed(&eager_rule("first", "apps", &cache));
    store.seed(&eager_rule("second", "other", &cache));
    let driver = driver(&store);
    driver.reconcile::<EagerCacheRule>("apps", "first").await;
    driver.reconcile::<EagerCacheRule>("other", "second").await;

    assert_eq!(store.count::<Deployment>(), 1);
    assert_eq!(store.count::<ServiceBinding>(), 2);
    assert_eq!(rule_keys(&store, "airports-eager-rules"), ["apps.first", "other.second"]);

    store.request_delete::<EagerCacheRule>("apps", "first");
    let result = driver.reconcile::<EagerCacheRule>("apps", "first").await;
    assert!(!result.retry, "unexpected retry: {:?}", result.error);

    assert!(store.fetch::<EagerCacheRule>("apps", "first").is_none());
    assert_eq!(store.count::<Deployment>(), 1, "second rule still needs the db-syncer");
    assert_eq!(store.count::<ServiceBinding>(), 2);
    assert_eq!(rule_keys(&store, "airports-eager-rules"), ["other.second"]);

    store.request_delete::<EagerCacheRule>("other", "second");
    let result = driver.reconcile::<EagerCacheRule>("other", "second").await;
    assert!(!result.retry, "unexpected retry: {:?}", result.error);

    assert!(store.fetch::<EagerCacheRule>("other", "second").is_none());
    assert_eq!(store.count::<Deployment>(), 0);
    assert_eq!(store.count::<ServiceBinding>(), 0);
    assert!(rule_keys(&store, "airports-eager-rules").is_empty());
}

#[tokio::test]
async fn test_rules_of_other_caches_do_not_hold_the_db_syncer() {
    let (store, cache) = world();
    let other = store.seed(&with_secret_source(local_cache("flights", "cache-ns"), "db-credentials"));
    store.seed(&eager_rule("airport-rule", "apps", &cache));
    store.seed(&eager_rule("flight-rule", "apps", &other));
    let driver = driver(&store);
    driver.reconcile::<EagerCacheRule>("apps", "airport-rule").await;
    driver.reconcile::<EagerCacheRule>("apps", "flight-rule").await;
    assert_eq!(store.count::<Deployment>(), 2);

    store.request_delete::<EagerCacheRule>("apps", "airport-rule");
    driver.reconcile::<EagerCacheRule>("apps", "airport-rule").await;

    assert!(store.fetch::<Deployment>("cache-ns", "airports-db-syncer").is_none());
    assert!(store.fetch::<Deployment>("cache-ns", "flights-db-syncer").is_some());
}

#[tokio::test]
async fn test_unlisted_rule_keeps_the_db_syncer() {
    let (store, cache) = world();
    store.seed(&eager_rule("by-id", "apps", &cache));
    let driver = driver(&store);
    driver.reconcile::<EagerCacheRule>("apps", "by-id").await;
    assert_eq!(store.count::<Deployment>(), 1);

    let rule: EagerCacheRule = store.fetch("apps", "by-id").unwrap();
    client(&store, "apps")
        .patch(&rule, |r: &mut EagerCacheRule| r.metadata.labels = None)
        .await
        .unwrap();
    store.request_delete::<EagerCacheRule>("apps", "by-id");
    let result = driver.reconcile::<EagerCacheRule>("apps", "by-id").await;

    assert!(!result.retry, "unexpected retry: {:?}", result.error);
    assert!(store.fetch::<EagerCacheRule>("apps", "by-id").is_none());
    assert_eq!(store.count::<Deployment>(), 1, "no listed rule, nothing to delete");
    assert_eq!(store.count::<ServiceBinding>(), 2);
}

#[tokio::test]
async fn test_missing_cache_reports_not_ready() {
    let store = Arc::new(InMemoryStore::new());
    let absent = local_cache("nowhere", "cache-ns");
    store.seed(&eager_rule("orphan", "apps", &absent));

    let result = driver(&store).reconcile::<EagerCacheRule>("apps", "orphan").await;

    assert!(result.retry);
    assert!(result.error.is_some());
    let rule: EagerCacheRule = store.fetch("apps", "orphan").unwrap();
    let ready = rule.condition(READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert!(ready.message.as_deref().unwrap().contains("cache-ns/nowhere"));
    assert_eq!(store.count::<ConfigMap>(), 0);
}

#[tokio::test]
async fn test_eager_rule_needs_a_data_source() {
    let store = Arc::new(InMemoryStore::new());
    let cache = store.seed(&local_cache("airports", "cache-ns"));
    store.seed(&eager_rule("by-id", "apps", &cache));

    let result = driver(&store).reconcile::<EagerCacheRule>("apps", "by-id").await;

    assert!(result.retry);
    assert!(matches!(result.error, Some(ReconcileError::Validation(_))));
    assert_eq!(store.count::<Deployment>(), 0);
}

#[tokio::test]
async fn test_lazy_rule_lifecycle() {
    let (store, cache) = world();
    let rule = store.seed(&lazy_rule("by-code", "apps", &cache));
    let driver = driver(&store);

    let result = driver.reconcile::<LazyCacheRule>("apps", "by-code").await;
    assert!(!result.retry, "unexpected retry: {:?}", result.error);
    assert_eq!(rule_keys(&store, "airports-lazy-rules"), [rule.config_key()]);
    assert_eq!(store.count::<Deployment>(), 0);
    assert!(store.fetch::<LazyCacheRule>("apps", "by-code").unwrap().is_ready());

    store.request_delete::<LazyCacheRule>("apps", "by-code");
    let result = driver.reconcile::<LazyCacheRule>("apps", "by-code").await;
    assert!(!result.retry);
    assert!(store.fetch::<LazyCacheRule>("apps", "by-code").is_none());
    assert!(rule_keys(&store, "airports-lazy-rules").is_empty());
}

#[tokio::test]
async fn test_finalizing_twice_is_harmless() {
    let (store, cache) = world();
    store.seed(&lazy_rule("by-code", "apps", &cache));
    let driver = driver(&store);
    driver.reconcile::<LazyCacheRule>("apps", "by-code").await;

    store.request_delete::<LazyCacheRule>("apps", "by-code");
    driver.reconcile::<LazyCacheRule>("apps", "by-code").await;
    let again = driver.reconcile::<LazyCacheRule>("apps", "by-code").await;

    assert!(!again.retry);
    assert!(again.error.is_none());
}
