//! Standard labels for operator-managed objects

use std::collections::BTreeMap;

/// `app.kubernetes.io/component`
pub const COMPONENT: &str = "app.kubernetes.io/component";
/// `app.kubernetes.io/instance`
pub const INSTANCE: &str = "app.kubernetes.io/instance";
/// `app.kubernetes.io/managed-by`
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// `app.kubernetes.io/part-of`
pub const PART_OF: &str = "app.kubernetes.io/part-of";

/// Value of `managed-by` on everything the operator writes
pub const OPERATOR: &str = "gingersnap-operator";
/// Value of `part-of` on everything the operator writes
pub const PRODUCT: &str = "gingersnap";

/// Name of the cache a rule refers to
pub const RULE_CACHE: &str = "gingersnap-project.io/cache";
/// Namespace of the cache a rule refers to
pub const RULE_CACHE_NAMESPACE: &str = "gingersnap-project.io/cache-namespace";

/// Role of a managed workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// Infinispan or Redis pods serving a cache
    CacheBackend,
    /// Pods streaming database changes into a cache
    DbSyncer,
    /// Config maps collecting the rules of a cache
    RuleConfig,
}

impl Component {
    /// Label value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CacheBackend => "cache-backend",
            Self::DbSyncer => "db-syncer",
            Self::RuleConfig => "rule-config",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full label set for a `component` belonging to `owner`
#[must_use]
pub fn labels(component: Component, owner: &str) -> BTreeMap<String, String> {
    let mut labels = selector(component, owner);
    labels.insert(MANAGED_BY.to_string(), OPERATOR.to_string());
    labels.insert(PART_OF.to_string(), PRODUCT.to_string());
    labels
}

/// Pod selector for a `component` belonging to `owner`
#[must_use]
pub fn selector(component: Component, owner: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (COMPONENT.to_string(), component.as_str().to_string()),
        (INSTANCE.to_string(), owner.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn label_set_is_a_superset_of_the_selector() {
        let full = labels(Component::DbSyncer, "cache-a");
        let sel = selector(Component::DbSyncer, "cache-a");
        assert!(sel.iter().all(|(k, v)| full.get(k) == Some(v)));
        assert_eq!(full.get(MANAGED_BY).map(String::as_str), Some("gingersnap-operator"));
        assert_eq!(full.len(), 4);
    }

    #[test]
    fn labels_depend_only_on_inputs() {
        assert_eq!(
            labels(Component::CacheBackend, "x"),
            labels(Component::CacheBackend, "x")
        );
        assert_eq!(
            selector(Component::CacheBackend, "x").get(COMPONENT).map(String::as_str),
            Some("cache-backend")
        );
    }
}
