//! Update orchestration (spec §4.5.1): runs the uninstall short-path with
//! volumes preserved, then re-enters the install pipeline at `validating`
//! against the manifest's new version in the same job, inheriting hwaddr,
//! ip_address, mount_points, inputs, env_vars, and devices from the
//! existing Install so the app comes back up looking the same to anything
//! keyed on those values.

use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};
use crate::job::context::JobContext;
use crate::job::steps::{
    allocating, check_cancel, configuring, creating, executing, finalizing, pushing_sdk,
    rollback, starting, validating, waiting_network,
};
use crate::job::uninstall;
use crate::store::models::JobState;

pub async fn run(ctx: &mut JobContext, scratch_dir: &PathBuf) -> EngineResult<()> {
    match run_inner(ctx, scratch_dir).await {
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

async fn run_inner(ctx: &mut JobContext, scratch_dir: &PathBuf) -> EngineResult<()> {
    let install_id = ctx
        .job
        .install_id
        .clone()
        .ok_or_else(|| EngineError::fatal("update job missing install_id"))?;
    let install = ctx.store.get_install(&install_id).await?;
    let old_ctid = install.ctid;
    let existing_mounts = ctx.store.get_mount_points_for_install(&install_id).await?;

    // Inherited defaults: whatever the enqueue request didn't override
    // falls back to what the running Install already had.
    let mut inputs = install.inputs.clone();
    inputs.extend(ctx.job.inputs.clone());
    ctx.job.inputs = inputs;

    let mut env_vars = install.env_vars.clone();
    env_vars.extend(ctx.job.env_vars.clone());
    ctx.job.env_vars = env_vars;

    if ctx.job.devices.is_empty() {
        ctx.job.devices = install.devices.clone();
    }
    if ctx.job.ip_address.is_none() {
        ctx.job.ip_address = install.ip_address.clone();
    }

    uninstall::stopping(ctx, old_ctid).await?;
    check_cancel(ctx).await?;
    let detached = uninstall::detaching_volumes(ctx, &install_id, old_ctid, true).await?;
    check_cancel(ctx).await?;
    uninstall::destroying(ctx, old_ctid, true, &detached).await?;

    validating::run(ctx).await?;
    check_cancel(ctx).await?;

    let hwaddr = allocating::run(ctx).await?;
    check_cancel(ctx).await?;

    let mount_points = creating::run(ctx, &hwaddr, &existing_mounts).await?;
    check_cancel(ctx).await?;

    configuring::run(ctx).await?;
    check_cancel(ctx).await?;

    starting::run(ctx).await?;
    check_cancel(ctx).await?;

    waiting_network::run(ctx).await?;
    check_cancel(ctx).await?;

    let sdk_path = scratch_dir.join("sdk");
    let script_path = scratch_dir.join(format!("{}-update.sh", ctx.job.id));
    std::fs::write(&script_path, ctx.manifest.script.as_bytes())
        .map_err(|e| EngineError::fatal(format!("write script failed: {e}")))?;
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
        .filter_map(|i| env.get(&i.key).cloned())
        .collect();
    let raw_outputs = executing::run(ctx, &secret_values).await?;

    finalizing::run(ctx, &hwaddr, mount_points, raw_outputs).await
}
