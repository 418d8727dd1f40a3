//! Ready condition reporting shared by all kinds

use async_trait::async_trait;
use gingersnap_api::{Condition, HasConditions};
use gingersnap_reconcile::{Context, Halt, Object, ReconcileError, Step, StepResult};
use tracing::warn;

/// Write `Ready=False` with `message` and stop the pipeline with `cause`
///
/// When the status write itself fails, that failure is requeued instead.
pub async fn not_ready<R, D>(instance: &R, ctx: &mut Context<D>, message: String, cause: ReconcileError) -> Halt
where
    R: Object + HasConditions,
    D: Send,
{
    warn!(%message, error = %cause, "not ready");
    let mut updated = instance.clone();
    if updated.set_condition(Condition::not_ready(message.clone())) {
        if let Err(e) = ctx.client().update_status(&updated).await {
            return ctx.requeue(ReconcileError::remote(
                format!("unable to update Ready condition after: {message}"),
                e,
            ));
        }
    }
    ctx.requeue(cause)
}

/// Final step: mark the instance `Ready=True`
pub struct ReportReady;

#[async_trait]
impl<R, D> Step<R, D> for ReportReady
where
    R: Object + HasConditions,
    D: Send,
{
    fn name(&self) -> &'static str {
        "ReportReady"
    }

    async fn run(&self, instance: &R, ctx: &mut Context<D>) -> StepResult {
        let mut updated = instance.clone();
        if !updated.set_condition(Condition::ready()) {
            return Ok(());
        }
        match ctx.client().update_status(&updated).await {
            Ok(_) => Ok(()),
            Err(e) => Err(ctx.requeue(ReconcileError::remote("unable to update Ready condition", e))),
        }
    }
}
