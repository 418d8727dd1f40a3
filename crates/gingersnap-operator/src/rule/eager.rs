//! Db-syncer children of eager rules
//!
//! One db-syncer deployment and two service bindings exist per cache, shared
//! by every eager rule of that cache. They carry no owner reference; the last
//! rule to go deletes them.

use async_trait::async_trait;
use gingersnap_api::{
    labels, selector, Cache, CacheRule, Component, EagerCacheRule, ServiceBinding, ServiceBindingSpec,
    ServiceReference, WorkloadReference,
};
use gingersnap_reconcile::{Client, Context, Halt, ReconcileError, RemoteError, Scope, Step, StepResult};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use tracing::{debug, info};

use super::RuleData;

/// Binding type of the cache binding
const CACHE_BINDING_TYPE: &str = "gingersnap";
const DB_SYNCER_CONTAINER: &str = "db-syncer";
const RULES_VOLUME: &str = "eager-rules";
const RULES_MOUNT: &str = "/rules/eager";

fn cache_from(ctx: &mut Context<RuleData>) -> Result<Cache, Halt> {
    match ctx.data().cache.get() {
        Ok(cache) => Ok(cache.clone()),
        Err(e) => Err(ctx.requeue(e)),
    }
}

/// Client writing unowned objects next to the cache
fn shared_client(ctx: &Context<RuleData>, cache: &Cache) -> Client {
    ctx.client()
        .with_namespace(cache.namespace().unwrap_or_default())
        .without_owner()
}

fn db_syncer_workload(cache: &Cache) -> WorkloadReference {
    WorkloadReference {
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
        selector: Some(LabelSelector {
            match_labels: Some(selector(Component::DbSyncer, &cache.name_any())),
            match_expressions: None,
        }),
    }
}

fn db_syncer_binding(cache: &Cache, name: &str, service: ServiceReference, type_: &str) -> ServiceBinding {
    let mut binding = ServiceBinding::new(
        name,
        ServiceBindingSpec {
            service,
            type_: Some(type_.to_string()),
            workload: db_syncer_workload(cache),
        },
    );
    binding.metadata.namespace = cache.namespace();
    binding.metadata.labels = Some(labels(Component::DbSyncer, &cache.name_any()));
    binding
}

async fn apply_binding(ctx: &mut Context<RuleData>, cache: &Cache, binding: ServiceBinding) -> StepResult {
    let name = binding.name_any();
    match shared_client(ctx, cache).apply(&binding).await {
        Ok(result) => {
            debug!(binding = %name, %result, "service binding applied");
            Ok(())
        }
        Err(e) => Err(ctx.requeue(ReconcileError::remote(
            format!("unable to apply ServiceBinding '{name}'"),
            e,
        ))),
    }
}

/// Bind the db-syncer to the cache's source database
pub struct ApplyDbServiceBinding;

#[async_trait]
impl Step<EagerCacheRule, RuleData> for ApplyDbServiceBinding {
    fn name(&self) -> &'static str {
        "ApplyDbServiceBinding"
    }

    async fn run(&self, _rule: &EagerCacheRule, ctx: &mut Context<RuleData>) -> StepResult {
        let cache = cache_from(ctx)?;
        let Some(source) = &cache.spec.data_source else {
            return Err(ctx.requeue(ReconcileError::Validation(format!(
                "Cache '{}' has no dataSource for eager rules",
                cache.cache_service()
            ))));
        };

        let service = if let Some(provider) = &source.service_provider_ref {
            ServiceReference {
                api_version: provider.api_version.clone(),
                kind: provider.kind.clone(),
                name: provider.name.clone(),
            }
        } else if let Some(secret) = &source.secret_ref {
            ServiceReference {
                api_version: "v1".to_string(),
                kind: "Secret".to_string(),
                name: secret.name.clone(),
            }
        } else {
            return Err(ctx.requeue(ReconcileError::Validation(
                "dataSource needs either secretRef or serviceProviderRef".to_string(),
            )));
        };

        let binding = db_syncer_binding(
            &cache,
            &cache.cache_service().db_syncer_db_binding(),
            service,
            source.db_type.service_binding(),
        );
        apply_binding(ctx, &cache, binding).await
    }
}

/// Bind the db-syncer to the cache it feeds
pub struct ApplyCacheServiceBinding;

#[async_trait]
impl Step<EagerCacheRule, RuleData> for ApplyCacheServiceBinding {
    fn name(&self) -> &'static str {
        "ApplyCacheServiceBinding"
    }

    async fn run(&self, _rule: &EagerCacheRule, ctx: &mut Context<RuleData>) -> StepResult {
        let cache = cache_from(ctx)?;
        let names = cache.cache_service();
        let service = ServiceReference {
            api_version: "v1".to_string(),
            kind: "Secret".to_string(),
            name: names.db_syncer_cache_binding_secret(),
        };
        let binding = db_syncer_binding(&cache, &names.db_syncer_cache_binding(), service, CACHE_BINDING_TYPE);
        apply_binding(ctx, &cache, binding).await
    }
}

/// Shared db-syncer deployment of the cache
pub struct ApplyDbSyncer {
    image: String,
}

impl ApplyDbSyncer {
    /// Step deploying `image`
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self { image: image.into() }
    }

    fn deployment(&self, cache: &Cache) -> Deployment {
        let names = cache.cache_service();
        let owner = cache.name_any();
        let pod_labels = labels(Component::DbSyncer, &owner);
        let env = |name: &str, value: String| EnvVar {
            name: name.to_string(),
            value: Some(value),
            value_from: None,
        };

        Deployment {
            metadata: ObjectMeta {
                name: Some(names.db_syncer()),
                namespace: Some(names.namespace.clone()),
                labels: Some(pod_labels.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(selector(Component::DbSyncer, &owner)),
                    match_expressions: None,
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(pod_labels),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: DB_SYNCER_CONTAINER.to_string(),
                            image: Some(self.image.clone()),
                            env: Some(vec![
                                env("GINGERSNAP_DYNAMIC_MEMBERSHIP", "true".to_string()),
                                env("GINGERSNAP_K8S_NAMESPACE", names.namespace.clone()),
                                env("GINGERSNAP_K8S_RULE_CONFIG_MAP", names.eager_rules_config_map()),
                            ]),
                            resources: cache.db_syncer_resources().cloned(),
                            volume_mounts: Some(vec![VolumeMount {
                                name: RULES_VOLUME.to_string(),
                                mount_path: RULES_MOUNT.to_string(),
                                read_only: Some(true),
                                ..VolumeMount::default()
                            }]),
                            ..Container::default()
                        }],
                        volumes: Some(vec![Volume {
                            name: RULES_VOLUME.to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: names.eager_rules_config_map(),
                                optional: Some(true),
                                ..ConfigMapVolumeSource::default()
                            }),
                            ..Volume::default()
                        }]),
                        ..PodSpec::default()
                    }),
                },
                ..DeploymentSpec::default()
            }),
            status: None,
        }
    }
}

#[async_trait]
impl Step<EagerCacheRule, RuleData> for ApplyDbSyncer {
    fn name(&self) -> &'static str {
        "ApplyDbSyncer"
    }

    async fn run(&self, _rule: &EagerCacheRule, ctx: &mut Context<RuleData>) -> StepResult {
        let cache = cache_from(ctx)?;
        let deployment = self.deployment(&cache);
        let name = deployment.name_any();
        match shared_client(ctx, &cache).apply(&deployment).await {
            Ok(result) => {
                debug!(deployment = %name, %result, "db-syncer applied");
                Ok(())
            }
            Err(e) => Err(ctx.requeue(ReconcileError::remote(
                format!("unable to apply Deployment '{name}'"),
                e,
            ))),
        }
    }
}

/// Delete the shared db-syncer children once no other eager rule needs them
///
/// Rules of the cache are found by the cache-reference labels the driver
/// keeps on every rule. The children go only when the rule being finalized
/// is the single rule listed; an empty list keeps them. The scan is linear
/// in the number of rules.
pub struct RemoveDbSyncer;

#[async_trait]
impl<D: Send> Step<EagerCacheRule, D> for RemoveDbSyncer {
    fn name(&self) -> &'static str {
        "RemoveDbSyncer"
    }

    async fn run(&self, rule: &EagerCacheRule, ctx: &mut Context<D>) -> StepResult {
        let names = rule.cache_service();
        let listed = ctx
            .client()
            .list::<EagerCacheRule>(&names.rule_labels(), Scope::Cluster)
            .await;
        let rules = match listed {
            Ok(rules) => rules,
            Err(e) => {
                return Err(ctx.requeue(ReconcileError::remote(
                    format!("unable to list EagerCacheRules of Cache '{names}'"),
                    e,
                )))
            }
        };

        let last_reference = matches!(rules.as_slice(), [only] if only.uid() == rule.uid());
        if !last_reference {
            debug!(cache = %names, listed = rules.len(), "db-syncer kept");
            return Ok(());
        }

        let client = ctx.client().with_namespace(names.namespace.clone()).without_owner();
        let deleted: Result<(), RemoteError> = async {
            client.delete::<Deployment>(&names.db_syncer()).await?;
            client.delete::<ServiceBinding>(&names.db_syncer_db_binding()).await?;
            client.delete::<ServiceBinding>(&names.db_syncer_cache_binding()).await
        }
        .await;
        match deleted {
            Ok(()) => {
                info!(cache = %names, "db-syncer removed");
                Ok(())
            }
            Err(e) => Err(ctx.requeue(ReconcileError::remote(
                format!("unable to remove db-syncer of Cache '{names}'"),
                e,
            ))),
        }
    }
}
