//! `creating` step (spec §4.5.3): builds `mount_points` from the manifest's
//! volume declarations and calls `Create`.

use crate::container::types::{CreateOpts, IpConfig, MountPointOpt, MountSource};
use crate::error::{EngineError, EngineResult};
use crate::job::context::JobContext;
use crate::manifest::VolumeKind;
use crate::store::models::{JobState, MountPoint, MountPointKind};

/// Returns the mount points to attach, preferring a reattach-by-volume_id
/// when the update/reinstall path supplied one (spec §8 property 5: volume
/// bytes are never rewritten across uninstall-with-keep-volumes + reinstall).
pub async fn run(ctx: &mut JobContext, hwaddr: &str, existing_mounts: &[MountPoint]) -> EngineResult<Vec<MountPoint>> {
    ctx.transition(JobState::Creating).await?;

    let mut mount_points = Vec::new();
    let mut opts = Vec::new();

    for (idx, volume) in ctx.manifest.volumes.iter().enumerate() {
        let idx = idx as u32;
        let reused = existing_mounts.iter().find(|m| m.name == volume.name);

        let (source, mp) = match volume.kind {
            VolumeKind::Volume => {
                let storage = volume
                    .storage
                    .clone()
                    .or_else(|| ctx.job.volume_storages.get(&volume.name).cloned())
                    .unwrap_or_else(|| ctx.job.storage.clone());
                let size_gb = volume.size_gb.unwrap_or(1);
                match reused {
                    Some(existing) if existing.volume_id.is_some() => {
                        let volume_id = existing.volume_id.clone().unwrap();
                        (
                            MountSource::ExistingVolume { volume_id: volume_id.clone() },
                            MountPoint {
                                install_id: ctx.job.install_id.clone().unwrap_or_default(),
                                index: idx,
                                name: volume.name.clone(),
                                kind: MountPointKind::Volume,
                                mount_path: volume.mount_path.clone(),
                                read_only: volume.read_only,
                                volume_id: Some(volume_id),
                                size_gb: Some(size_gb),
                                storage: Some(storage),
                                host_path: None,
                            },
                        )
                    }
                    _ => (
                        MountSource::Volume { storage: storage.clone(), size_gb },
                        MountPoint {
                            install_id: ctx.job.install_id.clone().unwrap_or_default(),
                            index: idx,
                            name: volume.name.clone(),
                            kind: MountPointKind::Volume,
                            mount_path: volume.mount_path.clone(),
                            read_only: volume.read_only,
                            // Assigned by the container manager at create time;
                            // `finalizing` reads it back via GetConfig in a full
                            // implementation. Left unset here pending that read.
                            volume_id: None,
                            size_gb: Some(size_gb),
                            storage: Some(storage),
                            host_path: None,
                        },
                    ),
                }
            }
            VolumeKind::Bind => {
                let host_path = ctx
                    .job
                    .bind_mounts
                    .iter()
                    .find(|m| m.starts_with(&format!("{}=", volume.name)))
                    .and_then(|m| m.split_once('='))
                    .map(|(_, path)| path.to_string())
                    .ok_or_else(|| EngineError::validation(format!("no bind source supplied for volume '{}'", volume.name)))?;
                (
                    MountSource::Bind { host_path: host_path.clone() },
                    MountPoint {
                        install_id: ctx.job.install_id.clone().unwrap_or_default(),
                        index: idx,
                        name: volume.name.clone(),
                        kind: MountPointKind::Bind,
                        mount_path: volume.mount_path.clone(),
                        read_only: volume.read_only,
                        volume_id: None,
                        size_gb: None,
                        storage: None,
                        host_path: Some(host_path),
                    },
                )
            }
        };

        opts.push(MountPointOpt {
            index: idx,
            mount_path: volume.mount_path.clone(),
            read_only: volume.read_only,
            source,
        });
        mount_points.push(mp);
    }

    let create_opts = CreateOpts {
        ctid: ctx.job.ctid,
        ostemplate: ctx.manifest.ostemplate.clone().unwrap_or_default(),
        storage: ctx.job.storage.clone(),
        disk_gb: ctx.job.disk_gb,
        cores: ctx.job.cores,
        memory_mb: ctx.job.memory_mb,
        bridge: ctx.job.bridge.clone(),
        hwaddr: hwaddr.to_string(),
        hostname: ctx.job.hostname.clone(),
        ip_config: ctx.job.ip_address.as_ref().map(|ip| IpConfig {
            cidr: ip.clone(),
            gateway: String::new(),
        }),
        unprivileged: ctx.job.unprivileged,
        pool: ctx.job.pool.clone(),
        features: Vec::new(),
        onboot: ctx.job.onboot,
        tags: Vec::new(),
        mount_points: opts,
    };

    ctx.container
        .create(create_opts)
        .await
        .map_err(|e| EngineError::transient(format!("create failed: {e}")))?;

    ctx.info(&format!("created container {}", ctx.job.ctid)).await;
    Ok(mount_points)
}
