//! `finalizing` step (spec §4.5.3): resolves output templates, upserts the
//! Install row, and persists MountPoints — all inside one transaction so a
//! crash between them can never leave a completed Job without an Install.

use std::collections::HashMap;

use crate::error::EngineResult;
use crate::job::context::JobContext;
use crate::job::outputs::resolve_map;
use crate::store::installs::UpsertInstall;
use crate::store::models::{InstallStatus, JobState, MountPoint};

pub async fn run(
    ctx: &mut JobContext,
    hwaddr: &str,
    mount_points: Vec<MountPoint>,
    raw_outputs: HashMap<String, String>,
) -> EngineResult<()> {
    ctx.transition(JobState::Finalizing).await?;

    let resolved = resolve_map(&raw_outputs, ctx.job.ip_address.as_deref(), &ctx.job.inputs);
    ctx.store.set_job_outputs(&ctx.job.id, &resolved).await?;

    let install_id = ctx
        .job
        .install_id
        .clone()
        .unwrap_or_else(|| ctx.job.id.clone());

    ctx.store
        .upsert_install(UpsertInstall {
            id: install_id.clone(),
            app_id: ctx.job.app_id.clone(),
            app_name: ctx.job.app_name.clone(),
            app_version: ctx.job.app_version.clone(),
            ctid: ctx.job.ctid,
            node: ctx.job.node.clone(),
            pool: ctx.job.pool.clone(),
            storage: ctx.job.storage.clone(),
            bridge: ctx.job.bridge.clone(),
            hostname: ctx.job.hostname.clone(),
            ip_address: ctx.job.ip_address.clone(),
            hwaddr: hwaddr.to_string(),
            onboot: ctx.job.onboot,
            unprivileged: ctx.job.unprivileged,
            status: InstallStatus::Running,
            inputs: ctx.job.inputs.clone(),
            outputs: resolved,
            devices: ctx.job.devices.clone(),
            env_vars: ctx.job.env_vars.clone(),
            mount_points,
        })
        .await?;

    ctx.transition(JobState::Completed).await?;
    ctx.info("install finalized").await;
    Ok(())
}
