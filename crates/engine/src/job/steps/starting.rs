//! `starting` step (spec §4.5.3): start the container and poll for
//! `running` status within a bounded deadline.

use std::time::Duration;

use tokio::time::Instant;

use crate::container::types::ContainerState;
use crate::error::{EngineError, EngineResult};
use crate::job::context::JobContext;
use crate::store::models::JobState;

pub async fn run(ctx: &mut JobContext) -> EngineResult<()> {
    ctx.transition(JobState::Starting).await?;

    ctx.container
        .start(ctx.job.ctid)
        .await
        .map_err(|e| EngineError::transient(format!("start failed: {e}")))?;

    let deadline = Instant::now() + Duration::from_secs(ctx.config.start_timeout_secs);
    loop {
        if ctx.cancel_requested().await? {
            return Err(EngineError::cancelled());
        }
        let status = ctx
            .container
            .status(ctx.job.ctid)
            .await
            .map_err(|e| EngineError::transient(format!("status failed: {e}")))?;
        if status.status == ContainerState::Running {
            break;
        }
        if Instant::now() >= deadline {
            return Err(EngineError::timeout("container did not reach running state in time"));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    ctx.info("container running").await;
    Ok(())
}
