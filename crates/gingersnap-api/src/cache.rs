//! `Cache` custom resource

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::core::GroupVersionKind;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::{Condition, HasConditions};
use crate::service::CacheService;

/// Infinispan specific configuration
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct InfinispanSpec {}

/// Redis specific configuration
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RedisSpec {}

/// Cache topology
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentType {
    /// Independent replicas, no clustering
    #[default]
    Local,
    /// Replicas form one cluster
    Cluster,
}

/// How the cache backend is deployed
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheDeploymentSpec {
    /// Topology, `LOCAL` when omitted
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<DeploymentType>,
    /// Replica count; defaults depend on the topology
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Container resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// How the db-syncer is deployed
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DbSyncerDeploymentSpec {
    /// Container resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// Supported source databases
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DbType {
    /// PostgreSQL
    #[serde(alias = "POSTGRES_14")]
    Postgres,
    /// MySQL
    #[serde(alias = "MYSQL_8")]
    Mysql,
    /// Microsoft SQL Server
    #[serde(alias = "SQL_SERVER_2019")]
    SqlServer,
}

impl DbType {
    /// Service binding `type` for this database
    #[must_use]
    pub const fn service_binding(self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::Mysql => "mysql",
            Self::SqlServer => "sqlserver",
        }
    }
}

/// Reference to a secret in the cache namespace
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct SecretRef {
    /// Secret name
    pub name: String,
}

/// Reference to a provisioned service of any kind
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProviderRef {
    /// `group/version`, or just `version` for the core group
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Name
    pub name: String,
}

impl ServiceProviderRef {
    /// Group, version and kind of the referenced object
    #[must_use]
    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = self
            .api_version
            .split_once('/')
            .unwrap_or(("", self.api_version.as_str()));
        GroupVersionKind::gvk(group, version, &self.kind)
    }
}

/// Database the cache is populated from
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSpec {
    /// Database flavour
    pub db_type: DbType,
    /// Secret with connection details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretRef>,
    /// Provisioned service exposing connection details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_provider_ref: Option<ServiceProviderRef>,
}

/// Desired state of a cache
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "gingersnap-project.io",
    version = "v1alpha1",
    kind = "Cache",
    namespaced,
    status = "CacheStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    /// Run Infinispan (the default backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infinispan: Option<InfinispanSpec>,
    /// Run Redis instead of Infinispan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisSpec>,
    /// Backend deployment settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<CacheDeploymentSpec>,
    /// Db-syncer deployment settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_syncer: Option<DbSyncerDeploymentSpec>,
    /// Source database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSourceSpec>,
}

/// Observed state of a cache
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct CacheStatus {
    /// Observed conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Cache server implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Infinispan server
    Infinispan,
    /// Redis server
    Redis,
}

impl Backend {
    /// Port clients connect to
    #[must_use]
    pub const fn port(self) -> i32 {
        match self {
            Self::Infinispan => 11222,
            Self::Redis => 6379,
        }
    }

    /// Container and service port name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Infinispan => "infinispan",
            Self::Redis => "redis",
        }
    }
}

impl Cache {
    /// Backend selected by the spec; Redis only when `redis` is set
    #[must_use]
    pub fn backend(&self) -> Backend {
        if self.spec.redis.is_some() {
            Backend::Redis
        } else {
            Backend::Infinispan
        }
    }

    /// Topology, `LOCAL` when unset
    #[must_use]
    pub fn deployment_type(&self) -> DeploymentType {
        self.spec
            .deployment
            .as_ref()
            .and_then(|d| d.type_)
            .unwrap_or_default()
    }

    /// Check for a clustered topology
    #[must_use]
    pub fn is_clustered(&self) -> bool {
        self.deployment_type() == DeploymentType::Cluster
    }

    /// Identity and derived names
    #[must_use]
    pub fn cache_service(&self) -> CacheService {
        CacheService::new(self.name_any(), self.namespace().unwrap_or_default())
    }

    /// Db-syncer container resources
    #[must_use]
    pub fn db_syncer_resources(&self) -> Option<&ResourceRequirements> {
        self.spec.db_syncer.as_ref().and_then(|d| d.resources.as_ref())
    }
}

impl HasConditions for Cache {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(CacheStatus::default).conditions
    }
}
