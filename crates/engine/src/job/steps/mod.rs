//! Step modules for the install pipeline (spec §4.5.3), plus the
//! orchestration function the worker drives a job through. Each step owns
//! its own state transition; `run_install_pipeline` only sequences them and
//! funnels any error into rollback.

pub mod allocating;
pub mod configuring;
pub mod creating;
pub mod executing;
pub mod finalizing;
pub mod pushing_sdk;
pub mod rollback;
pub mod starting;
pub mod validating;
pub mod waiting_network;

use std::path::PathBuf;

use crate::error::EngineResult;
use crate::job::context::JobContext;
use crate::store::models::{JobState, MountPoint};

/// Drives a fresh install/reinstall/update-install job end to end. On any
/// step error, rolls back to `cancelled` (if the error is a cancellation)
/// or `failed` (otherwise), per spec §4.5.1/§4.5.4.
pub async fn run_install_pipeline(ctx: &mut JobContext, scratch_dir: &PathBuf) -> EngineResult<()> {
    match run_install_pipeline_inner(ctx, scratch_dir).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let target = if e.kind == crate::error::ErrorKind::Cancelled {
                JobState::Cancelled
            } else {
                JobState::Failed
            };
            rollback::run(ctx, target, &e).await
        }
    }
}

async fn run_install_pipeline_inner(ctx: &mut JobContext, scratch_dir: &PathBuf) -> EngineResult<()> {
    validating::run(ctx).await?;
    check_cancel(ctx).await?;

    let hwaddr = allocating::run(ctx).await?;
    check_cancel(ctx).await?;

    let install_id = ctx.job.install_id.clone();
    let existing_mounts: Vec<MountPoint> = match &install_id {
        Some(id) => ctx.store.get_mount_points_for_install(id).await.unwrap_or_default(),
        None => Vec::new(),
    };
    let mount_points = creating::run(ctx, &hwaddr, &existing_mounts).await?;
    check_cancel(ctx).await?;

    configuring::run(ctx).await?;
    check_cancel(ctx).await?;

    starting::run(ctx).await?;
    check_cancel(ctx).await?;

    waiting_network::run(ctx).await?;
    check_cancel(ctx).await?;

    let sdk_path = scratch_dir.join("sdk");
    let script_path = scratch_dir.join(format!("{}-install.sh", ctx.job.id));
    std::fs::write(&script_path, ctx.manifest.script.as_bytes())
        .map_err(|e| crate::error::EngineError::fatal(format!("write script failed: {e}")))?;
    let env_path = scratch_dir.join(format!("{}.env", ctx.job.id));

    let mut env = ctx.manifest.env.clone();
    env.extend(ctx.job.env_vars.clone());
    env.extend(ctx.job.inputs.clone());

    pushing_sdk::run(
        ctx,
        sdk_path.to_string_lossy().as_ref(),
        script_path.to_string_lossy().as_ref(),
        env_path.to_string_lossy().as_ref(),
        &env,
    )
    .await?;
    check_cancel(ctx).await?;

    let secret_values: Vec<String> = ctx
        .manifest
        .inputs
        .iter()
        .filter(|i| i.secret)
        .filter_map(|i| ctx.job.inputs.get(&i.key).cloned())
        .collect();
    let raw_outputs = executing::run(ctx, &secret_values).await?;

    finalizing::run(ctx, &hwaddr, mount_points, raw_outputs).await
}

pub(crate) async fn check_cancel(ctx: &JobContext) -> EngineResult<()> {
    if ctx.cancel_requested().await? {
        return Err(crate::error::EngineError::cancelled());
    }
    Ok(())
}
