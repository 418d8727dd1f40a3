//! Pipeline step trait

use async_trait::async_trait;

use crate::context::{Context, Halt};

/// Outcome of a step; `Err` stops the pipeline
pub type StepResult = Result<(), Halt>;

/// One unit of convergence or finalization work
///
/// A step reads the instance, does its remote work through the context's
/// client and either returns `Ok(())` or stops the pipeline with
/// `return Err(ctx.requeue(..))`.
#[async_trait]
pub trait Step<R, D>: Send + Sync
where
    R: Send + Sync,
    D: Send,
{
    /// Name used in logs and spans
    fn name(&self) -> &'static str;

    /// Run the step against `instance`
    async fn run(&self, instance: &R, ctx: &mut Context<D>) -> StepResult;
}
