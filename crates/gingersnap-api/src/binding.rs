//! `ServiceBinding` (`servicebinding.io/v1beta1`)
//!
//! Owned by the Service Binding operator; typed here so the db-syncer
//! bindings can be applied like any other object.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Object exposing the binding data
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReference {
    /// `group/version` of the service
    pub api_version: String,
    /// Kind of the service
    pub kind: String,
    /// Name of the service
    pub name: String,
}

/// Workloads that receive the binding
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadReference {
    /// `group/version` of the workload
    pub api_version: String,
    /// Kind of the workload
    pub kind: String,
    /// Workloads selected by label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

/// Binding of a service to a set of workloads
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "servicebinding.io", version = "v1beta1", kind = "ServiceBinding", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingSpec {
    /// Bound service
    pub service: ServiceReference,
    /// Binding type exposed to the workload
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Target workloads
    pub workload: WorkloadReference,
}
