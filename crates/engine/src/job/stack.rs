//! Stack install/uninstall orchestration (spec §4.5.5): several apps share
//! one container. Apps are provisioned in declared order; a failing app
//! leaves the Job `failed` without attempting the apps after it, and its
//! per-app status is recorded on the Stack row rather than inferred.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::container::types::{CreateOpts, DeviceDescriptor, IpConfig, MountPointOpt, MountSource};
use crate::error::{EngineError, EngineResult};
use crate::job::context::JobContext;
use crate::job::hwaddr;
use crate::job::outputs::{redact_secrets, resolve_map};
use crate::job::steps::{check_cancel, rollback, starting, validating, waiting_network};
use crate::manifest::{Manifest, VolumeKind};
use crate::store::models::{JobState, StackApp};

/// Mirrors `executing::OUTPUT_MARKER` — a script line of this form is
/// captured into the app's outputs rather than just logged.
const OUTPUT_MARKER: &str = "##OUTPUT##";

/// Encoded on the job at enqueue time since a `Job` row has no column for a
/// list of apps (spec §3 lists no such field); `StackInstall` stashes the
/// request as JSON under this input key for the worker to decode back out.
pub const STACK_APPS_INPUT_KEY: &str = "__stack_apps";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackAppRequest {
    pub app_id: String,
    pub app_version: String,
    pub inputs: HashMap<String, String>,
}

pub fn encode_apps(apps: &[StackAppRequest]) -> EngineResult<String> {
    serde_json::to_string(apps).map_err(|e| EngineError::fatal(format!("encode stack apps failed: {e}")))
}

pub fn decode_apps(raw: &str) -> EngineResult<Vec<StackAppRequest>> {
    serde_json::from_str(raw).map_err(|e| EngineError::fatal(format!("decode stack apps failed: {e}")))
}

/// One app's slice of the stack request: its manifest and the inputs the
/// user supplied for it.
pub struct StackAppSpec {
    pub manifest: Manifest,
    pub inputs: HashMap<String, String>,
}

pub async fn run_install(
    ctx: &mut JobContext,
    stack_id: &str,
    apps: &[StackAppSpec],
    scratch_dir: &PathBuf,
) -> EngineResult<()> {
    match run_install_inner(ctx, stack_id, apps, scratch_dir).await {
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

async fn run_install_inner(
    ctx: &mut JobContext,
    stack_id: &str,
    apps: &[StackAppSpec],
    scratch_dir: &PathBuf,
) -> EngineResult<()> {
    ctx.transition(JobState::Validating).await?;
    for app in apps {
        validating::validate_inputs(&app.manifest, &app.inputs)?;
    }
    ctx.info(&format!("validated {} app(s)", apps.len())).await;
    check_cancel(ctx).await?;

    ctx.transition(JobState::Allocating).await?;
    let ctid = ctx
        .container
        .allocate_ctid()
        .await
        .map_err(|e| EngineError::transient(format!("allocate_ctid failed: {e}")))?;
    ctx.store.set_job_ctid(&ctx.job.id, ctid).await?;
    ctx.job.ctid = ctid;
    let hwaddr = hwaddr::generate();
    ctx.info(&format!("allocated ctid {ctid}")).await;
    check_cancel(ctx).await?;

    ctx.transition(JobState::Creating).await?;
    let mut opts = Vec::new();
    let mut next_index = 0u32;
    for app in apps {
        for volume in &app.manifest.volumes {
            let idx = next_index;
            next_index += 1;
            let source = match volume.kind {
                VolumeKind::Volume => {
                    let storage = volume.storage.clone().unwrap_or_else(|| ctx.job.storage.clone());
                    MountSource::Volume { storage, size_gb: volume.size_gb.unwrap_or(1) }
                }
                VolumeKind::Bind => {
                    let host_path = ctx
                        .job
                        .bind_mounts
                        .iter()
                        .find(|m| m.starts_with(&format!("{}.{}=", app.manifest.app_id, volume.name)))
                        .and_then(|m| m.split_once('='))
                        .map(|(_, path)| path.to_string())
                        .ok_or_else(|| {
                            EngineError::validation(format!(
                                "no bind source supplied for {}.{}",
                                app.manifest.app_id, volume.name
                            ))
                        })?;
                    MountSource::Bind { host_path }
                }
            };
            opts.push(MountPointOpt {
                index: idx,
                mount_path: volume.mount_path.clone(),
                read_only: volume.read_only,
                source,
            });
        }
    }

    ctx.container
        .create(CreateOpts {
            ctid,
            ostemplate: apps
                .first()
                .and_then(|a| a.manifest.ostemplate.clone())
                .unwrap_or_default(),
            storage: ctx.job.storage.clone(),
            disk_gb: ctx.job.disk_gb,
            cores: ctx.job.cores,
            memory_mb: ctx.job.memory_mb,
            bridge: ctx.job.bridge.clone(),
            hwaddr: hwaddr.clone(),
            hostname: ctx.job.hostname.clone(),
            ip_config: ctx.job.ip_address.as_ref().map(|ip| IpConfig { cidr: ip.clone(), gateway: String::new() }),
            unprivileged: ctx.job.unprivileged,
            pool: ctx.job.pool.clone(),
            features: Vec::new(),
            onboot: ctx.job.onboot,
            tags: Vec::new(),
            mount_points: opts,
        })
        .await
        .map_err(|e| EngineError::transient(format!("create failed: {e}")))?;
    ctx.info(&format!("created container {ctid}")).await;
    check_cancel(ctx).await?;

    ctx.transition(JobState::Configuring).await?;
    let devices: Vec<DeviceDescriptor> = apps
        .iter()
        .flat_map(|a| a.manifest.devices.iter())
        .map(|d| DeviceDescriptor { path: d.path.clone(), gid: d.gid, mode: d.mode.clone() })
        .collect();
    if !devices.is_empty() {
        ctx.container
            .configure_devices(ctid, &devices)
            .await
            .map_err(|e| EngineError::transient(format!("configure_devices failed: {e}")))?;
    }
    check_cancel(ctx).await?;

    starting::run(ctx).await?;
    check_cancel(ctx).await?;

    let ip = waiting_network::run(ctx).await?;
    check_cancel(ctx).await?;

    ctx.transition(JobState::PushingSdk).await?;
    let mut app_paths = Vec::new();
    for app in apps {
        let script_root = format!("/opt/docktail-provision/apps/{}", app.manifest.app_id);
        let script_host = scratch_dir.join(format!("{}-{}.sh", ctx.job.id, app.manifest.app_id));
        std::fs::write(&script_host, app.manifest.script.as_bytes())
            .map_err(|e| EngineError::fatal(format!("write script failed: {e}")))?;
        ctx.container
            .push(ctid, script_host.to_string_lossy().as_ref(), &format!("{script_root}/install.sh"), Some("0755"))
            .await
            .map_err(|e| EngineError::transient(format!("push script failed: {e}")))?;

        let mut env = app.manifest.env.clone();
        env.extend(app.inputs.clone());
        let env_host = scratch_dir.join(format!("{}-{}.env", ctx.job.id, app.manifest.app_id));
        std::fs::write(
            &env_host,
            env.iter().map(|(k, v)| format!("{k}='{}'\n", v.replace('\'', "'\\''"))).collect::<String>(),
        )
        .map_err(|e| EngineError::fatal(format!("write env file failed: {e}")))?;
        ctx.container
            .push(ctid, env_host.to_string_lossy().as_ref(), &format!("{script_root}/.env"), Some("0600"))
            .await
            .map_err(|e| EngineError::transient(format!("push env failed: {e}")))?;

        app_paths.push((app, script_root, env));
    }
    ctx.info("provisioning assets pushed for all apps").await;
    check_cancel(ctx).await?;

    ctx.transition(JobState::Executing).await?;
    let mut stack_apps = Vec::new();
    for (app, script_root, env) in &app_paths {
        check_cancel(ctx).await?;
        ctx.store.set_stack_app_status(stack_id, &app.manifest.app_id, "installing", &HashMap::new()).await?;

        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("set -a; . {script_root}/.env; exec {script_root}/install.sh"),
        ];
        let secret_values: Vec<String> = app
            .manifest
            .inputs
            .iter()
            .filter(|i| i.secret)
            .filter_map(|i| env.get(&i.key).cloned())
            .collect();

        let raw_outputs: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
        let outputs_for_line = raw_outputs.clone();
        let job_id = ctx.job.id.clone();
        let log = ctx.log.clone();
        let mut on_line = |line: &str| {
            if let Some(rest) = line.strip_prefix(OUTPUT_MARKER) {
                if let Some((k, v)) = rest.trim().split_once('=') {
                    outputs_for_line.lock().unwrap().insert(k.trim().to_string(), v.trim().to_string());
                }
            }
            let redacted = redact_secrets(line, &secret_values.iter().map(String::as_str).collect::<Vec<_>>());
            let log = log.clone();
            let job_id = job_id.clone();
            tokio::spawn(async move {
                let _ = log.emit(&job_id, crate::store::models::LogLevel::Info, &redacted).await;
            });
        };

        let exit_code = ctx
            .container
            .exec_stream(ctid, &argv, &mut on_line)
            .await
            .map_err(|e| EngineError::transient(format!("exec_stream failed for {}: {e}", app.manifest.app_id)))?;

        if exit_code != 0 {
            ctx.store.set_stack_app_status(stack_id, &app.manifest.app_id, "failed", &HashMap::new()).await?;
            return Err(EngineError::fatal(format!(
                "app {} provisioning script exited {exit_code}",
                app.manifest.app_id
            )));
        }

        let raw_outputs = Arc::try_unwrap(raw_outputs).map(|m| m.into_inner().unwrap()).unwrap_or_default();
        let resolved = resolve_map(&raw_outputs, Some(&ip), &app.inputs);
        ctx.store.set_stack_app_status(stack_id, &app.manifest.app_id, "running", &resolved).await?;
        stack_apps.push(StackApp {
            app_id: app.manifest.app_id.clone(),
            inputs: app.inputs.clone(),
            status: "running".to_string(),
            outputs: resolved,
        });
        ctx.info(&format!("app {} provisioned", app.manifest.app_id)).await;
    }

    ctx.transition(JobState::Finalizing).await?;
    ctx.store.update_stack_apps(stack_id, &stack_apps).await?;
    ctx.transition(JobState::Completed).await?;
    ctx.info("stack finalized").await;
    Ok(())
}

pub async fn run_uninstall(ctx: &mut JobContext, stack_id: &str) -> EngineResult<()> {
    let stack = ctx.store.get_stack(stack_id).await?;

    ctx.transition(JobState::Stopping).await?;
    ctx.container
        .shutdown(stack.ctid, ctx.config.cancel_grace_period_secs)
        .await
        .map_err(|e| EngineError::transient(format!("shutdown failed: {e}")))?;

    ctx.transition(JobState::DetachingVolumes).await?;
    ctx.info("stack volumes marked for destruction").await;

    ctx.transition(JobState::Destroying).await?;
    ctx.container
        .destroy(stack.ctid, false)
        .await
        .map_err(|e| EngineError::transient(format!("destroy failed: {e}")))?;

    let uninstalled: Vec<StackApp> = stack
        .apps
        .into_iter()
        .map(|mut a| {
            a.status = "uninstalled".to_string();
            a
        })
        .collect();
    ctx.store.update_stack_apps(stack_id, &uninstalled).await?;

    ctx.transition(JobState::Finalizing).await?;
    ctx.transition(JobState::Completed).await?;
    ctx.info("stack uninstalled").await;
    Ok(())
}
