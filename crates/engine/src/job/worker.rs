//! Drains `JobEngine`'s queue and drives each job through the pipeline that
//! matches its `JobType` (spec §4.5.2). One worker handles one job at a
//! time; the pool size bounds total concurrency, and a per-ctid lock
//! (`JobEngine::lock_for_ctid`) keeps two jobs from touching the same
//! container's lifecycle at once.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::EngineResult;
use crate::job::context::JobContext;
use crate::job::engine::JobEngine;
use crate::job::stack::{self, StackAppSpec, STACK_APPS_INPUT_KEY};
use crate::job::{steps, uninstall, update};
use crate::manifest::Manifest;
use crate::store::models::{Job, JobState, JobType};

pub async fn run(engine: Arc<JobEngine>) {
    loop {
        let Some(job_id) = engine.dequeue().await else {
            break;
        };
        engine.mark_worker_active();
        if let Err(e) = process(&engine, &job_id).await {
            error!(job_id, error = %e, "job processing failed outside the pipeline's own error handling");
        }
        engine.mark_worker_idle();
    }
}

async fn process(engine: &Arc<JobEngine>, job_id: &str) -> EngineResult<()> {
    let job = engine.store.get_job(job_id).await?;
    if job.state.is_terminal() {
        warn!(job_id, "dequeued an already-terminal job, skipping");
        return Ok(());
    }

    let lock_ctid = existing_ctid(engine, &job).await;
    let _guard = match lock_ctid {
        Some(ctid) => Some(engine.lock_for_ctid(ctid).lock_owned().await),
        None => None,
    };

    info!(job_id, job_type = ?job.job_type, "dispatching job");

    let scratch_dir = engine.scratch_dir.join(&job.id);
    std::fs::create_dir_all(&scratch_dir).ok();

    let result = dispatch(engine, job, &scratch_dir).await;

    std::fs::remove_dir_all(&scratch_dir).ok();
    result
}

/// For jobs targeting an existing Install/Stack, resolves the ctid up front
/// so the per-ctid lock can be taken before any container operation runs.
async fn existing_ctid(engine: &Arc<JobEngine>, job: &Job) -> Option<u32> {
    if let Some(install_id) = &job.install_id {
        if let Ok(install) = engine.store.get_install(install_id).await {
            return Some(install.ctid);
        }
    }
    if let Some(stack_id) = &job.stack_id {
        if let Ok(stack) = engine.store.get_stack(stack_id).await {
            return Some(stack.ctid);
        }
    }
    None
}

async fn dispatch(engine: &Arc<JobEngine>, job: Job, scratch_dir: &std::path::PathBuf) -> EngineResult<()> {
    match job.job_type {
        JobType::Install | JobType::Reinstall => {
            let manifest = engine.manifests.load(&job.app_id, &job.app_version).await?;
            let mut ctx = build_context(engine, job, manifest);
            steps::run_install_pipeline(&mut ctx, scratch_dir).await
        }
        JobType::Update => {
            let manifest = engine.manifests.load(&job.app_id, &job.app_version).await?;
            let mut ctx = build_context(engine, job, manifest);
            update::run(&mut ctx, scratch_dir).await
        }
        JobType::Uninstall => {
            let manifest = engine.manifests.load(&job.app_id, &job.app_version).await.unwrap_or_else(|_| empty_manifest(&job.app_id));
            let mut ctx = build_context(engine, job, manifest);
            uninstall::run(&mut ctx).await
        }
        JobType::Start => {
            let manifest = engine.manifests.load(&job.app_id, &job.app_version).await.unwrap_or_else(|_| empty_manifest(&job.app_id));
            let mut ctx = build_context(engine, job, manifest);
            run_start(&mut ctx).await
        }
        JobType::Stop => {
            let manifest = engine.manifests.load(&job.app_id, &job.app_version).await.unwrap_or_else(|_| empty_manifest(&job.app_id));
            let mut ctx = build_context(engine, job, manifest);
            run_stop(&mut ctx).await
        }
        JobType::Restart => {
            let manifest = engine.manifests.load(&job.app_id, &job.app_version).await.unwrap_or_else(|_| empty_manifest(&job.app_id));
            let mut ctx = build_context(engine, job, manifest);
            run_restart(&mut ctx).await
        }
        JobType::StackInstall => {
            let stack_id = job.stack_id.clone().ok_or_else(|| crate::error::EngineError::fatal("stack job missing stack_id"))?;
            let raw = job.inputs.get(STACK_APPS_INPUT_KEY).cloned().unwrap_or_default();
            let requests = stack::decode_apps(&raw)?;
            let mut specs = Vec::with_capacity(requests.len());
            for req in &requests {
                let manifest = engine.manifests.load(&req.app_id, &req.app_version).await?;
                specs.push(StackAppSpec { manifest, inputs: req.inputs.clone() });
            }
            let placeholder = empty_manifest(&job.app_id);
            let mut ctx = build_context(engine, job, placeholder);
            stack::run_install(&mut ctx, &stack_id, &specs, scratch_dir).await
        }
        JobType::StackUninstall => {
            let stack_id = job.stack_id.clone().ok_or_else(|| crate::error::EngineError::fatal("stack job missing stack_id"))?;
            let placeholder = empty_manifest(&job.app_id);
            let mut ctx = build_context(engine, job, placeholder);
            stack::run_uninstall(&mut ctx, &stack_id).await
        }
    }
}

fn build_context(engine: &Arc<JobEngine>, job: Job, manifest: Manifest) -> JobContext {
    JobContext {
        store: engine.store.clone(),
        container: engine.container.clone(),
        log: engine.log.clone(),
        config: engine.config.clone(),
        manifest,
        job,
    }
}

fn empty_manifest(app_id: &str) -> Manifest {
    Manifest {
        app_id: app_id.to_string(),
        app_name: app_id.to_string(),
        app_version: String::new(),
        inputs: Vec::new(),
        volumes: Vec::new(),
        devices: Vec::new(),
        env: Default::default(),
        script: String::new(),
        timeout_sec: None,
        privileged: false,
        ostemplate: None,
        recommended_cores: None,
        recommended_memory_mb: None,
        recommended_disk_gb: None,
    }
}

async fn run_start(ctx: &mut JobContext) -> EngineResult<()> {
    ctx.container
        .start(ctx.job.ctid)
        .await
        .map_err(|e| crate::error::EngineError::transient(format!("start failed: {e}")))?;
    ctx.store.set_install_status(&ctx.job.install_id.clone().unwrap_or_default(), crate::store::models::InstallStatus::Running).await?;
    ctx.transition(JobState::Completed).await?;
    ctx.info("container started").await;
    Ok(())
}

async fn run_stop(ctx: &mut JobContext) -> EngineResult<()> {
    ctx.container
        .shutdown(ctx.job.ctid, ctx.config.cancel_grace_period_secs)
        .await
        .map_err(|e| crate::error::EngineError::transient(format!("shutdown failed: {e}")))?;
    ctx.store.set_install_status(&ctx.job.install_id.clone().unwrap_or_default(), crate::store::models::InstallStatus::Stopped).await?;
    ctx.transition(JobState::Completed).await?;
    ctx.info("container stopped").await;
    Ok(())
}

async fn run_restart(ctx: &mut JobContext) -> EngineResult<()> {
    ctx.container
        .shutdown(ctx.job.ctid, ctx.config.cancel_grace_period_secs)
        .await
        .map_err(|e| crate::error::EngineError::transient(format!("shutdown failed: {e}")))?;
    ctx.container
        .start(ctx.job.ctid)
        .await
        .map_err(|e| crate::error::EngineError::transient(format!("start failed: {e}")))?;
    ctx.store.set_install_status(&ctx.job.install_id.clone().unwrap_or_default(), crate::store::models::InstallStatus::Running).await?;
    ctx.transition(JobState::Completed).await?;
    ctx.info("container restarted").await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::container::fake::FakeContainerManager;
    use crate::container::types::{ContainerState, CreateOpts};
    use crate::error::{EngineError, EngineResult as Result};
    use crate::store::installs::UpsertInstall;
    use crate::store::models::InstallStatus;
    use crate::store::Store;

    struct NoopManifestSource;

    #[async_trait::async_trait]
    impl crate::manifest::ManifestSource for NoopManifestSource {
        async fn load(&self, _app_id: &str, _app_version: &str) -> Result<Manifest> {
            Err(EngineError::fatal("no manifests in this test double"))
        }
    }

    async fn test_engine() -> Arc<JobEngine> {
        let store = Store::connect_in_memory().await.unwrap();
        let container = Arc::new(FakeContainerManager::new());
        let manifests = Arc::new(NoopManifestSource);
        let config = EngineConfig::default().worker;
        JobEngine::new(store, container, manifests, config, std::env::temp_dir())
    }

    async fn seed_install_with_container(engine: &JobEngine, id: &str, ctid: u32) {
        engine
            .container
            .create(CreateOpts {
                ctid,
                ostemplate: "local:vztmpl/debian-12.tar.zst".into(),
                storage: "local-lvm".into(),
                disk_gb: 4,
                cores: 1,
                memory_mb: 512,
                bridge: "vmbr0".into(),
                hwaddr: "02:00:00:00:00:01".into(),
                hostname: "redis".into(),
                ip_config: None,
                unprivileged: true,
                pool: None,
                features: vec![],
                onboot: false,
                tags: vec![],
                mount_points: vec![],
            })
            .await
            .unwrap();

        engine
            .store
            .upsert_install(UpsertInstall {
                id: id.to_string(),
                app_id: "redis".into(),
                app_name: "Redis".into(),
                app_version: "1.0.0".into(),
                ctid,
                node: "pve".into(),
                pool: None,
                storage: "local-lvm".into(),
                bridge: "vmbr0".into(),
                hostname: "redis".into(),
                ip_address: None,
                hwaddr: "02:00:00:00:00:01".into(),
                onboot: false,
                unprivileged: true,
                status: InstallStatus::Stopped,
                inputs: Default::default(),
                outputs: Default::default(),
                devices: Vec::new(),
                env_vars: Default::default(),
                mount_points: Vec::new(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn start_job_completes_and_marks_install_running() {
        let engine = test_engine().await;
        seed_install_with_container(&engine, "install-1", 100).await;

        let submitted = engine.submit_start("install-1").await.unwrap();
        let job_id = engine.dequeue().await.unwrap();
        assert_eq!(job_id, submitted.id);

        process(&engine, &job_id).await.unwrap();

        let job = engine.get_job(&job_id).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        let install = engine.get_install("install-1").await.unwrap();
        assert_eq!(install.status, InstallStatus::Running);
        let status = engine.container.status(100).await.unwrap();
        assert_eq!(status.status, ContainerState::Running);
    }

    #[tokio::test]
    async fn stop_job_completes_and_marks_install_stopped() {
        let engine = test_engine().await;
        seed_install_with_container(&engine, "install-2", 101).await;
        engine.container.start(101).await.unwrap();

        let submitted = engine.submit_stop("install-2").await.unwrap();
        let job_id = engine.dequeue().await.unwrap();
        process(&engine, &job_id).await.unwrap();

        let job = engine.get_job(&submitted.id).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        let install = engine.get_install("install-2").await.unwrap();
        assert_eq!(install.status, InstallStatus::Stopped);
    }

    #[tokio::test]
    async fn process_skips_an_already_terminal_job() {
        let engine = test_engine().await;
        seed_install_with_container(&engine, "install-3", 102).await;

        let submitted = engine.submit_start("install-3").await.unwrap();
        engine
            .store
            .update_job_state(&submitted.id, JobState::Failed, Some("forced for test"))
            .await
            .unwrap();
        engine.dequeue().await.unwrap();

        // Skipping a terminal job must not touch its state or re-run the pipeline.
        process(&engine, &submitted.id).await.unwrap();
        let job = engine.get_job(&submitted.id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
    }

    #[tokio::test]
    async fn existing_ctid_resolves_from_the_targeted_install() {
        let engine = test_engine().await;
        seed_install_with_container(&engine, "install-4", 103).await;
        let submitted = engine.submit_stop("install-4").await.unwrap();
        let job = engine.get_job(&submitted.id).await.unwrap();

        assert_eq!(existing_ctid(&engine, &job).await, Some(103));
    }
}
