//! Reconcile driver
//!
//! ```text
//! load ─► NotFound ─────────────► done
//!      ─► deletionTimestamp ────► finalize pipeline ─► drop finalizer
//!      ─► otherwise ────────────► ensure finalizer + labels ─► converge pipeline
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use gingersnap_api::HasConditions;
use gingersnap_reconcile::{
    Client, Context, Object, ObjectStore, PipelineBuilder, PipelineResult, ReconcileError,
};
use kube::{Resource, ResourceExt};
use tokio::time::Instant;
use tracing::{debug, info, info_span, Instrument, Span};

use crate::config::OperatorConfig;

/// A resource kind the operator reconciles
pub trait Reconciled: Object + HasConditions {
    /// Data slots shared by the kind's steps
    type Data: Default + Send + 'static;

    /// Finalizer guarding external cleanup, if the kind needs one
    fn finalizer() -> Option<String> {
        None
    }

    /// Labels the driver keeps on every instance
    fn managed_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Convergence and finalization steps of the kind
    fn pipeline(config: &OperatorConfig) -> PipelineBuilder<Self, Self::Data>;
}

/// Runs one reconciliation attempt per call
#[derive(Clone)]
pub struct Driver {
    store: Arc<dyn ObjectStore>,
    config: Arc<OperatorConfig>,
}

impl Driver {
    /// Create a driver over `store`
    pub fn new(store: Arc<dyn ObjectStore>, config: OperatorConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    /// Operator configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Reconcile the instance `namespace/name` of `R`
    pub async fn reconcile<R: Reconciled>(&self, namespace: &str, name: &str) -> PipelineResult {
        let span = info_span!("reconcile", kind = %R::kind(&()), namespace, name);
        self.attempt::<R>(namespace, name, span.clone())
            .instrument(span)
            .await
    }

    async fn attempt<R: Reconciled>(&self, namespace: &str, name: &str, span: Span) -> PipelineResult {
        let client = Client::new(self.store.clone(), namespace)
            .with_field_manager(self.config.field_manager.clone(), self.config.conflict_policy)
            .with_deadline(Instant::now() + self.config.attempt_timeout);

        let instance = match client.load::<R>(name).await {
            Ok(instance) => instance,
            Err(e) if e.is_not_found() => {
                debug!("instance no longer exists");
                return PipelineResult::done();
            }
            Err(e) => return PipelineResult::failed(ReconcileError::remote("unable to load instance", e)),
        };

        let result = if instance.meta().deletion_timestamp.is_some() {
            self.finalize(&client, instance, span).await
        } else {
            self.converge(&client, instance, span).await
        };
        info!(retry = result.retry, delay = ?result.delay, error = ?result.error, "done");
        result
    }

    async fn converge<R: Reconciled>(&self, client: &Client, instance: R, span: Span) -> PipelineResult {
        let mut finalizers = instance.finalizers().to_vec();
        let missing_finalizer = match R::finalizer() {
            Some(finalizer) if !finalizers.contains(&finalizer) => {
                finalizers.push(finalizer);
                true
            }
            _ => false,
        };
        let labels = instance.managed_labels();
        let missing_labels = labels.iter().any(|(k, v)| instance.labels().get(k) != Some(v));

        let instance = if missing_finalizer || missing_labels {
            match client.patch_metadata(&instance, &finalizers, &labels).await {
                Ok(updated) => updated,
                Err(e) if e.is_conflict() => return PipelineResult::retry_after(Duration::ZERO),
                Err(e) => {
                    return PipelineResult::failed(ReconcileError::remote("unable to add finalizer and labels", e))
                }
            }
        } else {
            instance
        };

        self.run_pipeline(client, &instance, span).await
    }

    async fn finalize<R: Reconciled>(&self, client: &Client, instance: R, span: Span) -> PipelineResult {
        let Some(finalizer) = R::finalizer() else {
            return PipelineResult::done();
        };
        if !instance.finalizers().contains(&finalizer) {
            return PipelineResult::done();
        }

        let result = self.run_pipeline(client, &instance, span).await;
        if result.retry {
            return result;
        }

        let remaining: Vec<String> = instance
            .finalizers()
            .iter()
            .filter(|f| **f != finalizer)
            .cloned()
            .collect();
        match client.patch_metadata(&instance, &remaining, &BTreeMap::new()).await {
            Ok(_) => {
                debug!(%finalizer, "finalizer removed");
                PipelineResult::done()
            }
            Err(e) if e.is_not_found() => PipelineResult::done(),
            Err(e) if e.is_conflict() => PipelineResult::retry_after(Duration::ZERO),
            Err(e) => PipelineResult::failed(ReconcileError::remote("unable to remove finalizer", e)),
        }
    }

    async fn run_pipeline<R: Reconciled>(&self, client: &Client, instance: &R, span: Span) -> PipelineResult {
        let scoped = client.with_owner_of(instance);
        let timeout = self.config.attempt_timeout;

        let pipeline = match R::pipeline(&self.config)
            .with_context_provider(move || {
                let client = scoped.with_deadline(Instant::now() + timeout);
                Context::new(client, span.clone(), R::Data::default())
            })
            .build(instance)
        {
            Ok(pipeline) => pipeline,
            Err(e) => return PipelineResult::failed(e.into()),
        };
        debug!(phase = %pipeline.phase(), steps = ?pipeline.step_names(), "running pipeline");
        pipeline.process(instance).await
    }
}
