//! Testing utilities for the Gingersnap workspace
//!
//! An in-memory object store plus resource fixtures.

#![allow(missing_docs)]

pub mod store;

pub use store::{InMemoryStore, Operation, WriteStats};

use std::sync::Arc;

use gingersnap_api::{
    Cache, CacheDeploymentSpec, CacheRef, CacheSpec, DataSourceSpec, DbType, DeploymentType,
    EagerCacheRule, EagerCacheRuleSpec, LazyCacheRule, LazyCacheRuleSpec, RedisSpec, RuleKey,
    RuleValue, SecretRef,
};
use gingersnap_reconcile::{Client, ObjectStore};
use k8s_openapi::api::core::v1::Secret;
use serde_json::json;

pub fn local_cache(name: &str, namespace: &str) -> Cache {
    let mut cache = Cache::new(name, CacheSpec::default());
    cache.metadata.namespace = Some(namespace.to_string());
    cache
}

pub fn clustered_cache(name: &str, namespace: &str, replicas: Option<i32>) -> Cache {
    let mut cache = local_cache(name, namespace);
    cache.spec.deployment = Some(CacheDeploymentSpec {
        type_: Some(DeploymentType::Cluster),
        replicas,
        resources: None,
    });
    cache
}

pub fn redis_cache(name: &str, namespace: &str) -> Cache {
    let mut cache = local_cache(name, namespace);
    cache.spec.redis = Some(RedisSpec::default());
    cache
}

pub fn with_secret_source(mut cache: Cache, secret: &str) -> Cache {
    cache.spec.data_source = Some(DataSourceSpec {
        db_type: DbType::Postgres,
        secret_ref: Some(SecretRef {
            name: secret.to_string(),
        }),
        service_provider_ref: None,
    });
    cache
}

pub fn secret(name: &str, namespace: &str) -> Secret {
    let mut secret = Secret::default();
    secret.metadata.name = Some(name.to_string());
    secret.metadata.namespace = Some(namespace.to_string());
    secret
}

pub fn eager_rule(name: &str, namespace: &str, cache: &Cache) -> EagerCacheRule {
    let mut rule = EagerCacheRule::new(
        name,
        EagerCacheRuleSpec {
            cache_ref: cache_ref(cache),
            table_name: format!("{name}_table"),
            key: RuleKey {
                key_columns: vec!["id".to_string()],
                ..RuleKey::default()
            },
            value: RuleValue::default(),
        },
    );
    rule.metadata.namespace = Some(namespace.to_string());
    rule
}

pub fn lazy_rule(name: &str, namespace: &str, cache: &Cache) -> LazyCacheRule {
    let mut rule = LazyCacheRule::new(
        name,
        LazyCacheRuleSpec {
            cache_ref: cache_ref(cache),
            query: format!("select * from {name} where id = ?"),
            value: RuleValue::default(),
        },
    );
    rule.metadata.namespace = Some(namespace.to_string());
    rule
}

fn cache_ref(cache: &Cache) -> CacheRef {
    CacheRef {
        name: cache.metadata.name.clone().unwrap_or_default(),
        namespace: cache.metadata.namespace.clone().unwrap_or_default(),
    }
}

/// Store with create hooks that fill in what the API server assigns to services
pub fn store_with_server_defaults() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.on_create("Service", |svc| {
        if svc["spec"]["clusterIP"].is_null() {
            svc["spec"]["clusterIP"] = json!("10.96.0.17");
        }
        if let Some(ports) = svc["spec"]["ports"].as_array_mut() {
            for port in ports {
                if port["protocol"].is_null() {
                    port["protocol"] = json!("TCP");
                }
                if port["targetPort"].is_null() {
                    port["targetPort"] = port["port"].clone();
                }
            }
        }
    });
    store
}

pub fn client(store: &Arc<InMemoryStore>, namespace: &str) -> Client {
    let store: Arc<dyn ObjectStore> = store.clone();
    Client::new(store, namespace)
}
