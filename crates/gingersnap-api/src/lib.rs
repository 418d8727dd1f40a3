//! Gingersnap API - custom resources and naming conventions
//!
//! Types for the `gingersnap-project.io/v1alpha1` resources the operator
//! reconciles, the external `ServiceBinding` resource it writes, status
//! conditions, and the label and naming helpers shared by all controllers.

#![warn(unreachable_pub)]

pub mod binding;
pub mod cache;
pub mod condition;
pub mod labels;
pub mod rule;
pub mod service;

pub use binding::{ServiceBinding, ServiceBindingSpec, ServiceReference, WorkloadReference};
pub use cache::{
    Backend, Cache, CacheDeploymentSpec, CacheSpec, CacheStatus, DataSourceSpec, DbSyncerDeploymentSpec,
    DbType, DeploymentType, InfinispanSpec, RedisSpec, SecretRef, ServiceProviderRef,
};
pub use condition::{Condition, ConditionStatus, HasConditions, READY};
pub use labels::{labels, selector, Component};
pub use rule::{
    finalizer, CacheRef, CacheRule, EagerCacheRule, EagerCacheRuleSpec, KeyFormat, LazyCacheRule,
    LazyCacheRuleSpec, RuleKey, RuleStatus, RuleValue,
};
pub use service::CacheService;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// API group of the gingersnap resources
pub const GROUP: &str = "gingersnap-project.io";

/// Definitions of every resource this crate owns
#[must_use]
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![Cache::crd(), EagerCacheRule::crd(), LazyCacheRule::crd()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crds_share_the_group() {
        let crds = crds();
        assert_eq!(crds.len(), 3);
        assert!(crds.iter().all(|crd| crd.spec.group == GROUP));
        let kinds: Vec<_> = crds.iter().map(|crd| crd.spec.names.kind.as_str()).collect();
        assert_eq!(kinds, ["Cache", "EagerCacheRule", "LazyCacheRule"]);
    }
}
