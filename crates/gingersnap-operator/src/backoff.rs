//! Per-key exponential backoff for failed reconciliations

use std::time::Duration;

use dashmap::DashMap;

use crate::config::BackoffConfig;

/// Failure counters keyed by object
#[derive(Debug, Default)]
pub struct Backoff {
    config: BackoffConfig,
    failures: DashMap<String, u32>,
}

impl Backoff {
    /// Create a tracker with `config`
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    /// Record a failure for `key` and return the delay before the next attempt
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut failures = self.failures.entry(key.to_string()).or_insert(0);
        let exponent = (*failures).min(31);
        *failures = failures.saturating_add(1);
        self.config
            .base
            .saturating_mul(1u32 << exponent)
            .min(self.config.max)
    }

    /// Forget the failures of `key`
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Longest delay handed out
    #[inline]
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.config.max
    }
}
