use std::collections::BTreeMap;

use async_trait::async_trait;
use gingersnap_api::{labels, selector, Cache, Component};
use gingersnap_reconcile::{Context, OperationResult, ReconcileError, RemoteError, Step, StepResult};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, PodSpec, Secret,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use tracing::{debug, info};

use super::backend::{self, CONFIG_MOUNT, INFINISPAN_CONFIG, REDIS_CONFIG};
use super::{resolve_deployment, CacheData};
use crate::config::Images;
use crate::status::not_ready;

const CONFIG_VOLUME: &str = "config";

fn merge_labels(meta: &mut ObjectMeta, wanted: BTreeMap<String, String>) {
    meta.labels.get_or_insert_with(BTreeMap::new).extend(wanted);
}

fn log_result(kind: &str, name: &str, result: OperationResult) {
    if result == OperationResult::Unchanged {
        debug!(kind, name, %result);
    } else {
        info!(kind, name, %result);
    }
}

fn failed(context: String, err: RemoteError) -> ReconcileError {
    ReconcileError::remote(context, err)
}

/// Fill the deployment slot with defaults applied
pub struct ResolveDeployment;

#[async_trait]
impl Step<Cache, CacheData> for ResolveDeployment {
    fn name(&self) -> &'static str {
        "ResolveDeployment"
    }

    async fn run(&self, cache: &Cache, ctx: &mut Context<CacheData>) -> StepResult {
        let resolved = resolve_deployment(cache.spec.deployment.as_ref());
        debug!(replicas = resolved.replicas, topology = ?resolved.type_, "resolved deployment");
        ctx.data_mut().deployment.fill(resolved);
        Ok(())
    }
}

/// Check that the referenced data source exists
pub struct CheckDataSource;

#[async_trait]
impl Step<Cache, CacheData> for CheckDataSource {
    fn name(&self) -> &'static str {
        "CheckDataSource"
    }

    async fn run(&self, cache: &Cache, ctx: &mut Context<CacheData>) -> StepResult {
        let Some(source) = &cache.spec.data_source else {
            return Ok(());
        };

        let (what, loaded) = if let Some(provider) = &source.service_provider_ref {
            (
                format!("{} '{}'", provider.kind, provider.name),
                ctx.client().load_dynamic(&provider.gvk(), &provider.name).await.map(|_| ()),
            )
        } else if let Some(secret) = &source.secret_ref {
            (
                format!("Secret '{}'", secret.name),
                ctx.client().load::<Secret>(&secret.name).await.map(|_| ()),
            )
        } else {
            return Err(ctx.requeue(ReconcileError::Validation(
                "dataSource needs either secretRef or serviceProviderRef".to_string(),
            )));
        };

        match loaded {
            Ok(()) => Ok(()),
            Err(e) => {
                let message = format!("unable to load data source {what}");
                let cause = failed(message.clone(), e);
                Err(not_ready(cache, ctx, message, cause).await)
            }
        }
    }
}

/// ClusterIP service in front of the backend pods
pub struct ApplyService;

#[async_trait]
impl Step<Cache, CacheData> for ApplyService {
    fn name(&self) -> &'static str {
        "ApplyService"
    }

    async fn run(&self, cache: &Cache, ctx: &mut Context<CacheData>) -> StepResult {
        let name = cache.name_any();
        let backend = cache.backend();
        let result = ctx
            .client()
            .create_or_patch::<Service, _>(&name, |svc| {
                merge_labels(&mut svc.metadata, labels(Component::CacheBackend, &name));
                let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
                spec.type_ = Some("ClusterIP".to_string());
                spec.selector = Some(selector(Component::CacheBackend, &name));
                // keep server-assigned port fields on updates
                let ports = spec.ports.get_or_insert_with(Vec::new);
                if ports.is_empty() {
                    ports.push(ServicePort::default());
                }
                ports[0].name = Some(backend.name().to_string());
                ports[0].port = backend.port();
            })
            .await;
        match result {
            Ok(result) => {
                log_result("Service", &name, result);
                Ok(())
            }
            Err(e) => Err(ctx.requeue(failed(format!("unable to create or patch Service '{name}'"), e))),
        }
    }
}

/// Headless service for cluster membership
pub struct ApplyDiscoveryService;

#[async_trait]
impl Step<Cache, CacheData> for ApplyDiscoveryService {
    fn name(&self) -> &'static str {
        "ApplyDiscoveryService"
    }

    async fn run(&self, cache: &Cache, ctx: &mut Context<CacheData>) -> StepResult {
        let owner = cache.name_any();
        let name = cache.cache_service().discovery_service();
        let (port_name, port) = backend::discovery_port(cache.backend());
        let result = ctx
            .client()
            .create_or_patch::<Service, _>(&name, |svc| {
                merge_labels(&mut svc.metadata, labels(Component::CacheBackend, &owner));
                let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
                spec.type_ = Some("ClusterIP".to_string());
                spec.cluster_ip = Some("None".to_string());
                spec.publish_not_ready_addresses = Some(true);
                spec.selector = Some(selector(Component::CacheBackend, &owner));
                let ports = spec.ports.get_or_insert_with(Vec::new);
                if ports.is_empty() {
                    ports.push(ServicePort::default());
                }
                ports[0].name = Some(port_name.to_string());
                ports[0].port = port;
            })
            .await;
        match result {
            Ok(result) => {
                log_result("Service", &name, result);
                Ok(())
            }
            Err(e) => Err(ctx.requeue(failed(format!("unable to create or patch Service '{name}'"), e))),
        }
    }
}

async fn apply_config_map(
    cache: &Cache,
    ctx: &mut Context<CacheData>,
    key: &str,
    contents: String,
) -> StepResult {
    let name = cache.name_any();
    let result = ctx
        .client()
        .create_or_patch::<ConfigMap, _>(&name, |cm| {
            merge_labels(&mut cm.metadata, labels(Component::CacheBackend, &name));
            cm.data = Some(BTreeMap::from([(key.to_string(), contents)]));
        })
        .await;
    match result {
        Ok(result) => {
            log_result("ConfigMap", &name, result);
            Ok(())
        }
        Err(e) => Err(ctx.requeue(failed(format!("unable to create or patch ConfigMap '{name}'"), e))),
    }
}

/// Infinispan server configuration
pub struct ApplyInfinispanConfig;

#[async_trait]
impl Step<Cache, CacheData> for ApplyInfinispanConfig {
    fn name(&self) -> &'static str {
        "ApplyInfinispanConfig"
    }

    async fn run(&self, cache: &Cache, ctx: &mut Context<CacheData>) -> StepResult {
        apply_config_map(cache, ctx, INFINISPAN_CONFIG, backend::infinispan_xml(cache)).await
    }
}

/// Redis server configuration
pub struct ApplyRedisConfig;

#[async_trait]
impl Step<Cache, CacheData> for ApplyRedisConfig {
    fn name(&self) -> &'static str {
        "ApplyRedisConfig"
    }

    async fn run(&self, cache: &Cache, ctx: &mut Context<CacheData>) -> StepResult {
        apply_config_map(cache, ctx, REDIS_CONFIG, backend::redis_conf(cache)).await
    }
}

/// Backend deployment
pub struct ApplyDeployment {
    images: Images,
}

impl ApplyDeployment {
    /// Step deploying the given images
    #[must_use]
    pub fn new(images: Images) -> Self {
        Self { images }
    }
}

#[async_trait]
impl Step<Cache, CacheData> for ApplyDeployment {
    fn name(&self) -> &'static str {
        "ApplyDeployment"
    }

    async fn run(&self, cache: &Cache, ctx: &mut Context<CacheData>) -> StepResult {
        let resolved = match ctx.data().deployment.get() {
            Ok(resolved) => resolved.clone(),
            Err(e) => return Err(ctx.requeue(e)),
        };
        let name = cache.name_any();
        let backend = cache.backend();
        let image = match backend {
            gingersnap_api::Backend::Infinispan => self.images.infinispan.clone(),
            gingersnap_api::Backend::Redis => self.images.redis.clone(),
        };
        let pod_labels = labels(Component::CacheBackend, &name);
        let env = if cache.is_clustered() && backend == gingersnap_api::Backend::Infinispan {
            let service = cache.cache_service();
            vec![EnvVar {
                name: "JAVA_OPTIONS".to_string(),
                value: Some(format!(
                    "-Djgroups.dns.query={}.{}.svc.cluster.local",
                    service.discovery_service(),
                    service.namespace
                )),
                value_from: None,
            }]
        } else {
            Vec::new()
        };

        let result = ctx
            .client()
            .create_or_patch::<Deployment, _>(&name, |deploy| {
                merge_labels(&mut deploy.metadata, pod_labels.clone());
                let spec = deploy.spec.get_or_insert_with(DeploymentSpec::default);
                spec.replicas = Some(resolved.replicas);
                spec.selector = LabelSelector {
                    match_labels: Some(selector(Component::CacheBackend, &name)),
                    match_expressions: None,
                };

                let template = spec.template.metadata.get_or_insert_with(ObjectMeta::default);
                merge_labels(template, pod_labels);

                let pod = spec.template.spec.get_or_insert_with(PodSpec::default);
                let position = pod.containers.iter().position(|c| c.name == backend.name());
                let container = match position {
                    Some(i) => &mut pod.containers[i],
                    None => {
                        pod.containers.push(Container {
                            name: backend.name().to_string(),
                            ..Container::default()
                        });
                        let last = pod.containers.len() - 1;
                        &mut pod.containers[last]
                    }
                };
                container.image = Some(image);
                container.args = Some(backend::container_args(backend));
                container.ports = Some(vec![ContainerPort {
                    name: Some(backend.name().to_string()),
                    container_port: backend.port(),
                    protocol: Some("TCP".to_string()),
                    ..ContainerPort::default()
                }]);
                container.env = if env.is_empty() { None } else { Some(env) };
                if resolved.resources.is_some() {
                    container.resources = resolved.resources.clone();
                }
                container.volume_mounts = Some(vec![VolumeMount {
                    name: CONFIG_VOLUME.to_string(),
                    mount_path: CONFIG_MOUNT.to_string(),
                    read_only: Some(true),
                    ..VolumeMount::default()
                }]);

                pod.volumes = Some(vec![Volume {
                    name: CONFIG_VOLUME.to_string(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: name.clone(),
                        default_mode: Some(0o644),
                        ..ConfigMapVolumeSource::default()
                    }),
                    ..Volume::default()
                }]);
            })
            .await;
        match result {
            Ok(result) => {
                log_result("Deployment", &name, result);
                Ok(())
            }
            Err(e) => Err(ctx.requeue(failed(format!("unable to create or patch Deployment '{name}'"), e))),
        }
    }
}
