//! Names of the objects derived from one cache

use std::collections::BTreeMap;

use crate::labels;

/// Identity of a cache and the names of everything derived from it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheService {
    /// Cache name
    pub name: String,
    /// Cache namespace
    pub namespace: String,
}

impl CacheService {
    /// Identity of the cache `namespace/name`
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Shared db-syncer deployment
    #[must_use]
    pub fn db_syncer(&self) -> String {
        format!("{}-db-syncer", self.name)
    }

    /// Binding of the db-syncer to the database
    #[must_use]
    pub fn db_syncer_db_binding(&self) -> String {
        format!("{}-db-syncer-db", self.name)
    }

    /// Binding of the db-syncer to the cache
    #[must_use]
    pub fn db_syncer_cache_binding(&self) -> String {
        format!("{}-db-syncer-cache", self.name)
    }

    /// Secret behind the cache binding
    #[must_use]
    pub fn db_syncer_cache_binding_secret(&self) -> String {
        format!("{}-db-syncer-cache-secret", self.name)
    }

    /// Config map holding every eager rule of the cache
    #[must_use]
    pub fn eager_rules_config_map(&self) -> String {
        format!("{}-eager-rules", self.name)
    }

    /// Config map holding every lazy rule of the cache
    #[must_use]
    pub fn lazy_rules_config_map(&self) -> String {
        format!("{}-lazy-rules", self.name)
    }

    /// Headless service used for cluster membership
    #[must_use]
    pub fn discovery_service(&self) -> String {
        format!("{}-discovery", self.name)
    }

    /// Labels every rule pointing at this cache carries
    #[must_use]
    pub fn rule_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (labels::RULE_CACHE.to_string(), self.name.clone()),
            (labels::RULE_CACHE_NAMESPACE.to_string(), self.namespace.clone()),
        ])
    }
}

impl std::fmt::Display for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_names() {
        let svc = CacheService::new("airports", "prod");
        assert_eq!(svc.db_syncer(), "airports-db-syncer");
        assert_eq!(svc.db_syncer_db_binding(), "airports-db-syncer-db");
        assert_eq!(svc.db_syncer_cache_binding(), "airports-db-syncer-cache");
        assert_eq!(svc.db_syncer_cache_binding_secret(), "airports-db-syncer-cache-secret");
        assert_eq!(svc.eager_rules_config_map(), "airports-eager-rules");
        assert_eq!(svc.lazy_rules_config_map(), "airports-lazy-rules");
        assert_eq!(svc.discovery_service(), "airports-discovery");
        assert_eq!(svc.to_string(), "prod/airports");
    }

    #[test]
    fn rule_labels_identify_the_cache() {
        let selected = CacheService::new("airports", "prod").rule_labels();
        assert_eq!(selected.get(labels::RULE_CACHE).map(String::as_str), Some("airports"));
        assert_eq!(selected.get(labels::RULE_CACHE_NAMESPACE).map(String::as_str), Some("prod"));
    }
}
