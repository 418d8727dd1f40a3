//! Cache controller pipeline
//!
//! ```text
//! ResolveDeployment ─► CheckDataSource ─► ApplyService ─► [CLUSTER] ApplyDiscoveryService
//!   ─► ApplyInfinispanConfig | ApplyRedisConfig ─► ApplyDeployment ─► ReportReady
//! ```
//!
//! Every child is owned by the cache, so deletion is left to the garbage
//! collector and the kind has no finalizer.

mod backend;
mod steps;

pub use steps::{
    ApplyDeployment, ApplyDiscoveryService, ApplyInfinispanConfig, ApplyRedisConfig, ApplyService,
    CheckDataSource, ResolveDeployment,
};

use gingersnap_api::{Backend, Cache, CacheDeploymentSpec, DeploymentType};
use gingersnap_reconcile::{PipelineBuilder, Slot};
use k8s_openapi::api::core::v1::ResourceRequirements;

use crate::config::OperatorConfig;
use crate::driver::Reconciled;
use crate::status::ReportReady;

/// Deployment settings with defaults applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDeployment {
    /// Topology
    pub type_: DeploymentType,
    /// Replica count
    pub replicas: i32,
    /// Container resources
    pub resources: Option<ResourceRequirements>,
}

/// Apply the defaulting policy: `LOCAL` topology, 0 replicas for `LOCAL`, 1 for `CLUSTER`
#[must_use]
pub fn resolve_deployment(spec: Option<&CacheDeploymentSpec>) -> ResolvedDeployment {
    let type_ = spec.and_then(|d| d.type_).unwrap_or_default();
    let default_replicas = match type_ {
        DeploymentType::Local => 0,
        DeploymentType::Cluster => 1,
    };
    ResolvedDeployment {
        type_,
        replicas: spec.and_then(|d| d.replicas).unwrap_or(default_replicas),
        resources: spec.and_then(|d| d.resources.clone()),
    }
}

/// Slots shared by the cache steps
#[derive(Debug)]
pub struct CacheData {
    /// Filled by [`ResolveDeployment`]
    pub deployment: Slot<ResolvedDeployment>,
}

impl Default for CacheData {
    fn default() -> Self {
        Self {
            deployment: Slot::new("deployment"),
        }
    }
}

impl Reconciled for Cache {
    type Data = CacheData;

    fn pipeline(config: &OperatorConfig) -> PipelineBuilder<Self, CacheData> {
        PipelineBuilder::new()
            .step(ResolveDeployment)
            .step(CheckDataSource)
            .step(ApplyService)
            .step_if(Cache::is_clustered, ApplyDiscoveryService)
            .step_if(|c: &Cache| c.backend() == Backend::Infinispan, ApplyInfinispanConfig)
            .step_if(|c: &Cache| c.backend() == Backend::Redis, ApplyRedisConfig)
            .step(ApplyDeployment::new(config.images.clone()))
            .step(ReportReady)
    }
}
