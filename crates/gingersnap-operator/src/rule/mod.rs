//! Eager and lazy rule pipelines
//!
//! ```text
//! eager:  LoadCache ─► ApplyRuleConfig ─► ApplyDbServiceBinding ─► ApplyCacheServiceBinding
//!           ─► ApplyDbSyncer ─► ReportReady
//!         finalize: RemoveDbSyncer ─► RemoveRuleConfig
//!
//! lazy:   LoadCache ─► ApplyRuleConfig ─► ReportReady
//!         finalize: RemoveRuleConfig
//! ```

mod eager;
mod shared;

pub use eager::{ApplyCacheServiceBinding, ApplyDbServiceBinding, ApplyDbSyncer, RemoveDbSyncer};
pub use shared::{ApplyRuleConfig, LoadCache, RemoveRuleConfig};

use std::collections::BTreeMap;

use gingersnap_api::{finalizer, Cache, CacheRule, EagerCacheRule, LazyCacheRule};
use gingersnap_reconcile::{PipelineBuilder, Slot};

use crate::config::OperatorConfig;
use crate::driver::Reconciled;
use crate::status::ReportReady;

/// Slots shared by the rule steps
#[derive(Debug)]
pub struct RuleData {
    /// Filled by [`LoadCache`]
    pub cache: Slot<Cache>,
}

impl Default for RuleData {
    fn default() -> Self {
        Self {
            cache: Slot::new("cache"),
        }
    }
}

impl Reconciled for EagerCacheRule {
    type Data = RuleData;

    fn finalizer() -> Option<String> {
        Some(finalizer::<Self>())
    }

    fn managed_labels(&self) -> BTreeMap<String, String> {
        CacheRule::managed_labels(self)
    }

    fn pipeline(config: &OperatorConfig) -> PipelineBuilder<Self, RuleData> {
        PipelineBuilder::new()
            .step(LoadCache)
            .step(ApplyRuleConfig::<Self>::new())
            .step(ApplyDbServiceBinding)
            .step(ApplyCacheServiceBinding)
            .step(ApplyDbSyncer::new(config.images.db_syncer.clone()))
            .step(ReportReady)
            .on_finalize(RemoveDbSyncer)
            .on_finalize(RemoveRuleConfig::<Self>::new())
    }
}

impl Reconciled for LazyCacheRule {
    type Data = RuleData;

    fn finalizer() -> Option<String> {
        Some(finalizer::<Self>())
    }

    fn managed_labels(&self) -> BTreeMap<String, String> {
        CacheRule::managed_labels(self)
    }

    fn pipeline(_config: &OperatorConfig) -> PipelineBuilder<Self, RuleData> {
        PipelineBuilder::new()
            .step(LoadCache)
            .step(ApplyRuleConfig::<Self>::new())
            .step(ReportReady)
            .on_finalize(RemoveRuleConfig::<Self>::new())
    }
}
