//! Pipeline assembly and execution
//!
//! A [`PipelineBuilder`] holds two ordered step lists for one resource kind:
//! the convergence sequence, each step gated by a predicate over the
//! instance, and the finalization sequence. [`PipelineBuilder::build`]
//! picks one of them for a concrete instance and binds the context provider.
//!
//! ```text
//! build(instance)
//!   deletionTimestamp set ─► Finalize: on_finalize steps
//!   otherwise            ─► Converge: steps whose predicate holds
//!
//! process(instance)
//!   for step: deadline? ─► run ─► requeue? ─► stop
//! ```

use std::time::Duration;

use kube::Resource;
use tracing::{debug, info_span, Instrument};

use crate::context::Context;
use crate::error::{ReconcileError, RemoteError};
use crate::step::Step;

/// Builds the context for one attempt
pub type ContextProvider<D> = Box<dyn Fn() -> Context<D> + Send + Sync>;

type Predicate<R> = Box<dyn Fn(&R) -> bool + Send + Sync>;

/// Which sequence a pipeline runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Drive the world toward the desired state
    Converge,
    /// Release external state before deletion
    Finalize,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Converge => "converge",
            Self::Finalize => "finalize",
        })
    }
}

/// Pipeline construction errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// `build` was called before `with_context_provider`
    #[error("no context provider bound to the pipeline")]
    MissingContextProvider,
}

/// Outcome of one pipeline run
#[derive(Debug, Default)]
pub struct PipelineResult {
    /// Whether another attempt is wanted
    pub retry: bool,
    /// Delay before that attempt
    pub delay: Duration,
    /// Failure behind the retry, if any
    pub error: Option<ReconcileError>,
}

impl PipelineResult {
    /// Converged, nothing more to do
    #[must_use]
    pub fn done() -> Self {
        Self::default()
    }

    /// Retry after `delay`, without error
    #[must_use]
    pub fn retry_after(delay: Duration) -> Self {
        Self {
            retry: true,
            delay,
            error: None,
        }
    }

    /// Retry because of `error`
    #[must_use]
    pub fn failed(error: ReconcileError) -> Self {
        Self {
            retry: true,
            delay: Duration::ZERO,
            error: Some(error),
        }
    }
}

struct Registered<R, D> {
    step: Box<dyn Step<R, D>>,
    predicate: Option<Predicate<R>>,
}

/// Ordered step registrations for one resource kind
pub struct PipelineBuilder<R, D> {
    converge: Vec<Registered<R, D>>,
    finalize: Vec<Box<dyn Step<R, D>>>,
    provider: Option<ContextProvider<D>>,
}

impl<R, D> Default for PipelineBuilder<R, D> {
    fn default() -> Self {
        Self {
            converge: Vec::new(),
            finalize: Vec::new(),
            provider: None,
        }
    }
}

impl<R, D> PipelineBuilder<R, D>
where
    R: Resource + Send + Sync,
    D: Send,
{
    /// Empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an unconditional convergence step
    #[must_use]
    pub fn step(mut self, step: impl Step<R, D> + 'static) -> Self {
        self.converge.push(Registered {
            step: Box::new(step),
            predicate: None,
        });
        self
    }

    /// Append a convergence step that only runs when `predicate` holds
    #[must_use]
    pub fn step_if(
        mut self,
        predicate: impl Fn(&R) -> bool + Send + Sync + 'static,
        step: impl Step<R, D> + 'static,
    ) -> Self {
        self.converge.push(Registered {
            step: Box::new(step),
            predicate: Some(Box::new(predicate)),
        });
        self
    }

    /// Append a finalization step
    #[must_use]
    pub fn on_finalize(mut self, step: impl Step<R, D> + 'static) -> Self {
        self.finalize.push(Box::new(step));
        self
    }

    /// Bind the context constructor
    #[must_use]
    pub fn with_context_provider(mut self, provider: impl Fn() -> Context<D> + Send + Sync + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }

    /// Check whether a finalization sequence is registered
    #[must_use]
    pub fn has_finalizers(&self) -> bool {
        !self.finalize.is_empty()
    }

    /// Select the sequence for `instance`
    ///
    /// # Errors
    /// `PipelineError::MissingContextProvider` when no provider is bound.
    pub fn build(self, instance: &R) -> Result<Pipeline<R, D>, PipelineError> {
        let provider = self.provider.ok_or(PipelineError::MissingContextProvider)?;
        let (phase, steps) = if instance.meta().deletion_timestamp.is_some() {
            (Phase::Finalize, self.finalize)
        } else {
            let steps = self
                .converge
                .into_iter()
                .filter(|r| r.predicate.as_ref().map_or(true, |p| p(instance)))
                .map(|r| r.step)
                .collect();
            (Phase::Converge, steps)
        };
        Ok(Pipeline { phase, steps, provider })
    }
}

/// Steps selected for one instance, ready to run
pub struct Pipeline<R, D> {
    phase: Phase,
    steps: Vec<Box<dyn Step<R, D>>>,
    provider: ContextProvider<D>,
}

impl<R, D> Pipeline<R, D>
where
    R: Resource + Send + Sync,
    D: Send,
{
    /// Sequence this pipeline runs
    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Names of the selected steps, in order
    #[must_use]
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run the steps in order with a fresh context
    pub async fn process(&self, instance: &R) -> PipelineResult {
        let mut ctx = (self.provider)();
        let parent = ctx.span().clone();

        for step in &self.steps {
            if ctx.deadline_expired() {
                let _ = ctx.requeue(ReconcileError::remote(
                    format!("before step {}", step.name()),
                    RemoteError::DeadlineExceeded,
                ));
                break;
            }

            let span = info_span!(parent: &parent, "step", name = step.name(), phase = %self.phase);
            let outcome = step.run(instance, &mut ctx).instrument(span).await;
            if outcome.is_err() || ctx.requeue_requested() {
                debug!(parent: &parent, step = step.name(), "pipeline stopped");
                break;
            }
        }

        match ctx.take_requeue() {
            Some(requeue) => PipelineResult {
                retry: true,
                delay: requeue.delay,
                error: requeue.error,
            },
            None => PipelineResult::done(),
        }
    }
}
