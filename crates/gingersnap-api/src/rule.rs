//! `EagerCacheRule` and `LazyCacheRule` custom resources
//!
//! Rules of both kinds point at one cache. Every rule of a cache owns one key
//! (`<namespace>.<name>`) in the cache's shared rule config map, and carries
//! the cache-reference labels so rules of one cache can be listed together.

use std::collections::BTreeMap;

use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::{Condition, HasConditions};
use crate::service::CacheService;

/// Reference to the cache a rule feeds
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct CacheRef {
    /// Cache name
    pub name: String,
    /// Cache namespace
    pub namespace: String,
}

/// Encoding of composed keys
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyFormat {
    /// Columns joined with the separator
    #[default]
    Text,
    /// Columns as a JSON object
    Json,
}

/// How cache keys are built from table rows
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RuleKey {
    /// Key encoding
    #[serde(default)]
    pub format: KeyFormat,
    /// Separator for `TEXT` keys
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_separator: String,
    /// Columns forming the key
    pub key_columns: Vec<String>,
}

/// Which columns end up in cached values
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RuleValue {
    /// Value columns; all columns when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_columns: Vec<String>,
}

/// Observed state of a rule
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RuleStatus {
    /// Observed conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Table replicated eagerly into a cache
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "gingersnap-project.io",
    version = "v1alpha1",
    kind = "EagerCacheRule",
    namespaced,
    status = "RuleStatus"
)]
pub struct EagerCacheRuleSpec {
    /// Target cache
    pub cache_ref: CacheRef,
    /// Source table
    pub table_name: String,
    /// Key composition
    pub key: RuleKey,
    /// Value selection
    #[serde(default)]
    pub value: RuleValue,
}

/// Query result cached on demand
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "gingersnap-project.io",
    version = "v1alpha1",
    kind = "LazyCacheRule",
    namespaced,
    status = "RuleStatus"
)]
pub struct LazyCacheRuleSpec {
    /// Target cache
    pub cache_ref: CacheRef,
    /// Query whose results are cached
    pub query: String,
    /// Value selection
    #[serde(default)]
    pub value: RuleValue,
}

/// Behaviour shared by both rule kinds
pub trait CacheRule: Resource<DynamicType = ()> + HasConditions + Sized {
    /// Referenced cache
    fn cache_ref(&self) -> &CacheRef;

    /// Name of the shared config map this kind of rule is stored in
    fn config_map(&self) -> String;

    /// Rule spec as stored in the config map
    ///
    /// # Errors
    /// Serialization failure of the spec.
    fn spec_json(&self) -> Result<String, serde_json::Error>;

    /// Identity of the referenced cache
    fn cache_service(&self) -> CacheService {
        let cache = self.cache_ref();
        CacheService::new(cache.name.clone(), cache.namespace.clone())
    }

    /// Key this rule owns in the shared config map
    fn config_key(&self) -> String {
        format!("{}.{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    /// Labels identifying the referenced cache
    fn managed_labels(&self) -> BTreeMap<String, String> {
        self.cache_service().rule_labels()
    }
}

/// Finalizer name for a kind: `<Kind>.<group>`
#[must_use]
pub fn finalizer<K: Resource<DynamicType = ()>>() -> String {
    format!("{}.{}", K::kind(&()), K::group(&()))
}

impl CacheRule for EagerCacheRule {
    fn cache_ref(&self) -> &CacheRef {
        &self.spec.cache_ref
    }

    fn config_map(&self) -> String {
        self.cache_service().eager_rules_config_map()
    }

    fn spec_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.spec)
    }
}

impl CacheRule for LazyCacheRule {
    fn cache_ref(&self) -> &CacheRef {
        &self.spec.cache_ref
    }

    fn config_map(&self) -> String {
        self.cache_service().lazy_rules_config_map()
    }

    fn spec_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.spec)
    }
}

macro_rules! rule_conditions {
    ($($kind:ty),*) => {$(
        impl HasConditions for $kind {
            fn conditions(&self) -> &[Condition] {
                self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
            }

            fn conditions_mut(&mut self) -> &mut Vec<Condition> {
                &mut self.status.get_or_insert_with(RuleStatus::default).conditions
            }
        }
    )*};
}

rule_conditions!(EagerCacheRule, LazyCacheRule);
