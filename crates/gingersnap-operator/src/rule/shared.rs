//! Steps common to eager and lazy rules

use std::collections::BTreeMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use gingersnap_api::labels::{labels, Component};
use gingersnap_api::{Cache, CacheRule};
use gingersnap_reconcile::{Context, Object, ReconcileError, Step, StepResult};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use tracing::{debug, info};

use super::RuleData;
use crate::status::not_ready;

/// Load the referenced cache into the `cache` slot
pub struct LoadCache;

#[async_trait]
impl<R> Step<R, RuleData> for LoadCache
where
    R: CacheRule + Object,
{
    fn name(&self) -> &'static str {
        "LoadCache"
    }

    async fn run(&self, rule: &R, ctx: &mut Context<RuleData>) -> StepResult {
        let service = rule.cache_service();
        let loaded = ctx
            .client()
            .with_namespace(service.namespace.clone())
            .load::<Cache>(&service.name)
            .await;
        match loaded {
            Ok(cache) => {
                ctx.data_mut().cache.fill(cache);
                Ok(())
            }
            Err(e) => {
                let message = format!("unable to load Cache CR '{service}'");
                let cause = ReconcileError::remote(message.clone(), e);
                Err(not_ready(rule, ctx, message, cause).await)
            }
        }
    }
}

/// Store the rule spec under its key in the shared rule config map
///
/// The config map lives next to the cache and is owned by it.
pub struct ApplyRuleConfig<R>(PhantomData<fn(&R)>);

impl<R> ApplyRuleConfig<R> {
    /// Step for rules of kind `R`
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<R> Default for ApplyRuleConfig<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> Step<R, RuleData> for ApplyRuleConfig<R>
where
    R: CacheRule + Object,
{
    fn name(&self) -> &'static str {
        "ApplyRuleConfig"
    }

    async fn run(&self, rule: &R, ctx: &mut Context<RuleData>) -> StepResult {
        let cache = match ctx.data().cache.get() {
            Ok(cache) => cache.clone(),
            Err(e) => return Err(ctx.requeue(e)),
        };
        let spec = match rule.spec_json() {
            Ok(spec) => spec,
            Err(e) => return Err(ctx.requeue(ReconcileError::Failed(format!("unable to encode rule spec: {e}")))),
        };
        let service = rule.cache_service();
        let name = rule.config_map();
        let key = rule.config_key();
        let wanted = labels(Component::RuleConfig, &cache.name_any());

        let result = ctx
            .client()
            .with_namespace(service.namespace.clone())
            .with_owner_of(&cache)
            .create_or_patch::<ConfigMap, _>(&name, |cm| {
                cm.metadata.labels.get_or_insert_with(BTreeMap::new).extend(wanted);
                cm.data.get_or_insert_with(BTreeMap::new).insert(key.clone(), spec);
            })
            .await;
        match result {
            Ok(result) => {
                info!(config_map = %name, %key, %result, "rule stored");
                Ok(())
            }
            Err(e) => Err(ctx.requeue(ReconcileError::remote(
                format!("unable to store rule '{key}' in ConfigMap '{name}'"),
                e,
            ))),
        }
    }
}

/// Drop the rule's key from the shared rule config map
pub struct RemoveRuleConfig<R>(PhantomData<fn(&R)>);

impl<R> RemoveRuleConfig<R> {
    /// Step for rules of kind `R`
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<R> Default for RemoveRuleConfig<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R, D> Step<R, D> for RemoveRuleConfig<R>
where
    R: CacheRule + Object,
    D: Send,
{
    fn name(&self) -> &'static str {
        "RemoveRuleConfig"
    }

    async fn run(&self, rule: &R, ctx: &mut Context<D>) -> StepResult {
        let service = rule.cache_service();
        let name = rule.config_map();
        let key = rule.config_key();
        let client = ctx.client().with_namespace(service.namespace.clone()).without_owner();

        let live = match client.load::<ConfigMap>(&name).await {
            Ok(cm) if cm.data.as_ref().is_some_and(|d| d.contains_key(&key)) => cm,
            Ok(_) => return Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(config_map = %name, "rule config map already gone");
                return Ok(());
            }
            Err(e) => {
                return Err(ctx.requeue(ReconcileError::remote(
                    format!("unable to load ConfigMap '{name}'"),
                    e,
                )))
            }
        };

        let removed = client
            .patch(&live, |cm| {
                if let Some(data) = cm.data.as_mut() {
                    data.remove(&key);
                }
            })
            .await;
        match removed {
            Ok(_) => {
                info!(config_map = %name, %key, "rule removed");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(config_map = %name, "rule config map removed concurrently");
                Ok(())
            }
            Err(e) => Err(ctx.requeue(ReconcileError::remote(
                format!("unable to remove rule '{key}' from ConfigMap '{name}'"),
                e,
            ))),
        }
    }
}
