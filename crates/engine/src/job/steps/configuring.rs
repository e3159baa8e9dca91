//! `configuring` step (spec §4.5.3): device passthrough, request-time extra
//! mounts, and any LXC config lines device policy requires (e.g. cgroup
//! `devices.allow` entries for GPU passthrough).

use crate::container::types::DeviceDescriptor;
use crate::error::{EngineError, EngineResult};
use crate::job::context::JobContext;
use crate::store::models::JobState;

pub async fn run(ctx: &mut JobContext) -> EngineResult<()> {
    ctx.transition(JobState::Configuring).await?;

    let devices: Vec<DeviceDescriptor> = ctx
        .manifest
        .devices
        .iter()
        .map(|d| DeviceDescriptor {
            path: d.path.clone(),
            gid: d.gid,
            mode: d.mode.clone(),
        })
        .collect();

    if !devices.is_empty() {
        ctx.container
            .configure_devices(ctx.job.ctid, &devices)
            .await
            .map_err(|e| EngineError::transient(format!("configure_devices failed: {e}")))?;

        let lines: Vec<String> = devices
            .iter()
            .map(|d| format!("lxc.cgroup2.devices.allow: c {} rwm", d.path))
            .collect();
        ctx.container
            .append_lxc_config(ctx.job.ctid, &lines)
            .await
            .map_err(|e| EngineError::transient(format!("append_lxc_config failed: {e}")))?;
    }

    for (idx, extra) in ctx.job.extra_mounts.iter().enumerate() {
        let Some((host_path, ct_path)) = extra.split_once(':') else {
            return Err(EngineError::validation(format!("malformed extra_mount '{extra}'")));
        };
        ctx.container
            .mount_host_path(ctx.job.ctid, (ctx.manifest.volumes.len() + idx) as u32, host_path, ct_path, false)
            .await
            .map_err(|e| EngineError::transient(format!("mount_host_path failed: {e}")))?;
    }

    ctx.info("devices and extra mounts configured").await;
    Ok(())
}
