//! `rolling_back` / `cancelling` cleanup (spec §4.5.1, §4.5.3, §4.5.4).
//! Best-effort destroy of any container created so far; never deletes
//! managed volumes unless the job had already reached `finalizing` (which,
//! by construction, it cannot have — rollback only runs from earlier
//! states).

use crate::error::{EngineError, EngineResult};
use crate::job::context::JobContext;
use crate::store::models::JobState;

pub async fn run(ctx: &mut JobContext, target: JobState, reason: &EngineError) -> EngineResult<()> {
    let rollback_state = if target == JobState::Cancelled {
        JobState::Cancelling
    } else {
        JobState::RollingBack
    };
    // A job that fails validation before a ctid is ever allocated has
    // nothing to clean up; skip straight to the terminal state so it
    // doesn't pass through a rollback state it never needs (spec §8
    // property 4: no side effects before `finalizing`).
    if ctx.job.ctid == 0 {
        finish(ctx, target, reason).await?;
        return Ok(());
    }

    if crate::job::types::is_allowed_transition(&ctx.job.state, &rollback_state) {
        ctx.transition(rollback_state).await?;
    }
    ctx.warn(&format!("rolling back: {}", reason.job_error_string())).await;

    if let Err(e) = ctx.container.destroy(ctx.job.ctid, true).await {
        ctx.warn(&format!("rollback destroy failed (continuing): {e}")).await;
    }

    finish(ctx, target, reason).await
}

async fn finish(ctx: &mut JobContext, target: JobState, reason: &EngineError) -> EngineResult<()> {
    match target {
        JobState::Cancelled => {
            ctx.store.update_job_state(&ctx.job.id, JobState::Cancelled, Some(&reason.job_error_string())).await?;
            ctx.job.state = JobState::Cancelled;
        }
        JobState::Failed => {
            ctx.fail(reason).await?;
        }
        other => {
            return Err(EngineError::fatal(format!("rollback asked for non-terminal target {other:?}")));
        }
    }
    Ok(())
}
