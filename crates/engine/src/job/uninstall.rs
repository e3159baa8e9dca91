//! Uninstall short-path pipeline (spec §4.5.1): `stopping → detaching_volumes
//! → destroying → finalizing → completed`, skipping the install pipeline's
//! `validating`/`allocating`/`creating`/… states since the target container
//! already exists.

use crate::error::{EngineError, EngineResult};
use crate::job::context::JobContext;
use crate::store::models::JobState;

/// Encoded on the job at enqueue time since the `Job` row has no dedicated
/// `keep_volumes` column (spec §3 lists no such field); `Uninstall(install_id,
/// keep_volumes)` stashes it as an input so the worker can read it back.
pub const KEEP_VOLUMES_INPUT_KEY: &str = "__keep_volumes";

pub async fn run(ctx: &mut JobContext) -> EngineResult<()> {
    let keep_volumes = ctx
        .job
        .inputs
        .get(KEEP_VOLUMES_INPUT_KEY)
        .map(|v| v == "true")
        .unwrap_or(false);

    let install_id = ctx
        .job
        .install_id
        .clone()
        .ok_or_else(|| EngineError::fatal("uninstall job missing install_id"))?;
    let install = ctx.store.get_install(&install_id).await?;

    stopping(ctx, install.ctid).await?;
    let indices = detaching_volumes(ctx, &install_id, install.ctid, keep_volumes).await?;
    destroying(ctx, install.ctid, keep_volumes, &indices).await?;

    ctx.store.mark_install_uninstalled(&install_id).await?;
    ctx.transition(JobState::Finalizing).await?;
    ctx.transition(JobState::Completed).await?;
    ctx.info("uninstall finalized").await;
    Ok(())
}

pub(crate) async fn stopping(ctx: &mut JobContext, ctid: u32) -> EngineResult<()> {
    ctx.transition(JobState::Stopping).await?;
    ctx.container
        .shutdown(ctid, ctx.config.cancel_grace_period_secs)
        .await
        .map_err(|e| EngineError::transient(format!("shutdown failed: {e}")))?;
    ctx.info("container stopped").await;
    Ok(())
}

pub(crate) async fn detaching_volumes(
    ctx: &mut JobContext,
    install_id: &str,
    ctid: u32,
    keep_volumes: bool,
) -> EngineResult<Vec<u32>> {
    ctx.transition(JobState::DetachingVolumes).await?;
    let mount_points = ctx.store.get_mount_points_for_install(install_id).await?;
    let indices: Vec<u32> = mount_points.iter().map(|m| m.index).collect();

    if keep_volumes && !indices.is_empty() {
        ctx.container
            .detach_mount_points(ctid, &indices)
            .await
            .map_err(|e| EngineError::transient(format!("detach_mount_points failed: {e}")))?;
        ctx.info(&format!("detached {} mount point(s), volumes preserved", indices.len())).await;
    } else {
        for mp in &mount_points {
            ctx.store.delete_mount_point(install_id, mp.index).await?;
        }
        ctx.info("volumes marked for destruction").await;
    }
    Ok(indices)
}

pub(crate) async fn destroying(ctx: &mut JobContext, ctid: u32, keep_volumes: bool, _detached_indices: &[u32]) -> EngineResult<()> {
    ctx.transition(JobState::Destroying).await?;
    ctx.container
        .destroy(ctid, keep_volumes)
        .await
        .map_err(|e| EngineError::transient(format!("destroy failed: {e}")))?;
    ctx.info(&format!("container {ctid} destroyed (keep_volumes={keep_volumes})")).await;
    Ok(())
}
