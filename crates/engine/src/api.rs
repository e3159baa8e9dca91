//! Engine-facing API (spec §6.1) — the surface an external HTTP layer would
//! call into, specified so that layer could be re-implemented independently
//! of this crate. `EngineApi` is a thin façade over `JobEngine` plus the two
//! operations that don't go through the job queue: `ValidateStack` (a
//! synchronous dry run) and `OpenTerminal` (wired directly to
//! `terminal::bridge`, bypassing the job engine entirely).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::container::types::ContainerState;
use crate::error::EngineResult;
use crate::job::engine::JobEngine;
use crate::job::stack::{encode_apps, StackAppRequest, STACK_APPS_INPUT_KEY};
use crate::job::steps::validating::validate_inputs;
use crate::manifest::ManifestSource;
use crate::store::jobs::NewJob;
use crate::store::models::{Install, Job, JobLog, JobType};
use crate::terminal::{self, TerminalError};

pub struct EngineApi {
    engine: Arc<JobEngine>,
    manifests: Arc<dyn ManifestSource>,
    helper_socket_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInstallRequest {
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub node: String,
    pub storage: String,
    pub bridge: String,
    pub pool: Option<String>,
    pub cores: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
    pub onboot: bool,
    pub unprivileged: bool,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub inputs: HashMap<String, String>,
    pub bind_mounts: Vec<String>,
    pub volume_storages: HashMap<String, String>,
    pub devices: Vec<String>,
    pub env_vars: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStackRequest {
    pub stack_name: String,
    pub node: String,
    pub storage: String,
    pub bridge: String,
    pub pool: Option<String>,
    pub cores: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
    pub onboot: bool,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub bind_mounts: Vec<String>,
    pub apps: Vec<StackAppRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateStackResponse {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommended_resources: RecommendedResources,
    pub ostemplate: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendedResources {
    pub cores: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
}

/// Fallback per-app resource hint when a manifest doesn't carry one.
const DEFAULT_APP_CORES: u32 = 1;
const DEFAULT_APP_MEMORY_MB: u32 = 256;
const DEFAULT_APP_DISK_GB: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct InstallDetail {
    pub install: Install,
    pub live_status: Option<ContainerState>,
}

impl EngineApi {
    pub fn new(engine: Arc<JobEngine>, manifests: Arc<dyn ManifestSource>, helper_socket_path: String) -> Self {
        Self { engine, manifests, helper_socket_path }
    }

    pub async fn start_install(&self, req: StartInstallRequest) -> EngineResult<Job> {
        let new = NewJob {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: JobType::Install,
            app_id: req.app_id,
            app_name: req.app_name,
            app_version: req.app_version,
            install_id: Some(uuid::Uuid::new_v4().to_string()),
            stack_id: None,
            cores: req.cores,
            memory_mb: req.memory_mb,
            disk_gb: req.disk_gb,
            storage: req.storage,
            bridge: req.bridge,
            pool: req.pool,
            node: req.node,
            onboot: req.onboot,
            unprivileged: req.unprivileged,
            hostname: req.hostname,
            ip_address: req.ip_address,
            inputs: req.inputs,
            bind_mounts: req.bind_mounts,
            volume_storages: req.volume_storages,
            extra_mounts: Vec::new(),
            devices: req.devices,
            env_vars: req.env_vars,
        };
        self.engine.submit_install(new).await
    }

    pub async fn get_job(&self, id: &str) -> EngineResult<Job> {
        self.engine.get_job(id).await
    }

    pub async fn list_jobs(&self, install_id: Option<&str>) -> EngineResult<Vec<Job>> {
        self.engine.list_jobs(install_id).await
    }

    pub async fn cancel_job(&self, id: &str) -> EngineResult<()> {
        self.engine.cancel(id).await
    }

    pub async fn get_logs_since(&self, job_id: &str, since_id: i64) -> EngineResult<(Vec<JobLog>, i64)> {
        self.engine.get_logs_since(job_id, since_id).await
    }

    pub async fn uninstall(&self, install_id: &str, keep_volumes: bool) -> EngineResult<Job> {
        self.engine.submit_uninstall(install_id, keep_volumes).await
    }

    pub async fn reinstall(&self, install_id: &str) -> EngineResult<Job> {
        let install = self.engine.get_install(install_id).await?;
        let new = NewJob {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: JobType::Reinstall,
            app_id: install.app_id.clone(),
            app_name: install.app_name.clone(),
            app_version: install.app_version.clone(),
            install_id: Some(install_id.to_string()),
            stack_id: None,
            cores: 0,
            memory_mb: 0,
            disk_gb: 0,
            storage: install.storage.clone(),
            bridge: install.bridge.clone(),
            pool: install.pool.clone(),
            node: install.node.clone(),
            onboot: install.onboot,
            unprivileged: install.unprivileged,
            hostname: install.hostname.clone(),
            ip_address: install.ip_address.clone(),
            inputs: install.inputs.clone(),
            bind_mounts: Vec::new(),
            volume_storages: HashMap::new(),
            extra_mounts: Vec::new(),
            devices: install.devices.clone(),
            env_vars: install.env_vars.clone(),
        };
        self.engine.submit_update(new).await
    }

    /// Drives the same re-entrant pipeline as `Reinstall` (spec §4.5.1): the
    /// worker's `update::run` decides which manifest version to install
    /// against from the `Job.app_version` it was enqueued with, which the
    /// caller is expected to have already bumped via the catalog.
    pub async fn update(&self, install_id: &str, new_app_version: &str) -> EngineResult<Job> {
        let install = self.engine.get_install(install_id).await?;
        let new = NewJob {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: JobType::Update,
            app_id: install.app_id.clone(),
            app_name: install.app_name.clone(),
            app_version: new_app_version.to_string(),
            install_id: Some(install_id.to_string()),
            stack_id: None,
            cores: 0,
            memory_mb: 0,
            disk_gb: 0,
            storage: install.storage.clone(),
            bridge: install.bridge.clone(),
            pool: install.pool.clone(),
            node: install.node.clone(),
            onboot: install.onboot,
            unprivileged: install.unprivileged,
            hostname: install.hostname.clone(),
            ip_address: install.ip_address.clone(),
            inputs: HashMap::new(),
            bind_mounts: Vec::new(),
            volume_storages: HashMap::new(),
            extra_mounts: Vec::new(),
            devices: Vec::new(),
            env_vars: HashMap::new(),
        };
        self.engine.submit_update(new).await
    }

    pub async fn start_container(&self, install_id: &str) -> EngineResult<Job> {
        self.engine.submit_start(install_id).await
    }

    pub async fn stop_container(&self, install_id: &str) -> EngineResult<Job> {
        self.engine.submit_stop(install_id).await
    }

    pub async fn restart_container(&self, install_id: &str) -> EngineResult<Job> {
        self.engine.submit_restart(install_id).await
    }

    pub async fn create_stack(&self, req: CreateStackRequest) -> EngineResult<Job> {
        let apps_json = encode_apps(&req.apps)?;
        let mut inputs = HashMap::new();
        inputs.insert(STACK_APPS_INPUT_KEY.to_string(), apps_json);
        let new = NewJob {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: JobType::StackInstall,
            app_id: req.stack_name.clone(),
            app_name: req.stack_name.clone(),
            app_version: String::new(),
            install_id: None,
            stack_id: Some(uuid::Uuid::new_v4().to_string()),
            cores: req.cores,
            memory_mb: req.memory_mb,
            disk_gb: req.disk_gb,
            storage: req.storage,
            bridge: req.bridge,
            pool: req.pool,
            node: req.node,
            onboot: req.onboot,
            unprivileged: true,
            hostname: req.hostname,
            ip_address: req.ip_address,
            inputs,
            bind_mounts: req.bind_mounts,
            volume_storages: HashMap::new(),
            extra_mounts: Vec::new(),
            devices: Vec::new(),
            env_vars: HashMap::new(),
        };
        self.engine.submit_stack_install(new).await
    }

    /// Dry-run validation for a stack request (spec §6.1): loads every app's
    /// manifest, runs the same input checks the worker would, and sums a
    /// rough resource recommendation — no container is touched and no job
    /// is created.
    pub async fn validate_stack(&self, req: &CreateStackRequest) -> ValidateStackResponse {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut cores = 0u32;
        let mut memory_mb = 0u32;
        let mut disk_gb = 0u32;
        let mut ostemplate = None;

        for app in &req.apps {
            match self.manifests.load(&app.app_id, &app.app_version).await {
                Ok(manifest) => {
                    if let Err(e) = validate_inputs(&manifest, &app.inputs) {
                        errors.push(format!("{}: {}", app.app_id, e.message));
                    }
                    cores += manifest.recommended_cores.unwrap_or(DEFAULT_APP_CORES);
                    memory_mb += manifest.recommended_memory_mb.unwrap_or(DEFAULT_APP_MEMORY_MB);
                    disk_gb += manifest.recommended_disk_gb.unwrap_or(DEFAULT_APP_DISK_GB);
                    if ostemplate.is_none() {
                        ostemplate = manifest.ostemplate.clone();
                    }
                    if manifest.volumes.iter().any(|v| v.storage.is_none()) {
                        warnings.push(format!("{}: volume has no storage override, using stack default", app.app_id));
                    }
                }
                Err(e) => errors.push(format!("{}: manifest load failed: {}", app.app_id, e.message)),
            }
        }

        ValidateStackResponse {
            valid: errors.is_empty(),
            errors,
            warnings,
            recommended_resources: RecommendedResources { cores, memory_mb, disk_gb },
            ostemplate,
        }
    }

    pub async fn uninstall_stack(&self, stack_id: &str) -> EngineResult<Job> {
        self.engine.submit_stack_uninstall(stack_id).await
    }

    /// Merges the stored `Install` row with a live status snapshot from the
    /// container manager; a snapshot failure (container gone, helper
    /// unreachable) degrades to `live_status: None` rather than failing the
    /// whole call, since the stored row is still useful on its own.
    pub async fn get_install(&self, install_id: &str) -> EngineResult<InstallDetail> {
        let install = self.engine.get_install(install_id).await?;
        let live_status = self
            .engine
            .container_status(install.ctid)
            .await
            .ok()
            .map(|detail| detail.status);
        Ok(InstallDetail { install, live_status })
    }

    pub async fn list_installs(&self) -> EngineResult<Vec<Install>> {
        self.engine.list_installs().await
    }

    pub async fn open_terminal<C>(&self, install_id: &str, shell: &str, client: C) -> Result<(), TerminalError>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let install = self
            .engine
            .get_install(install_id)
            .await
            .map_err(|e| TerminalError::Connect(e.message))?;
        terminal::bridge(&self.helper_socket_path, install.ctid, shell, client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::container::fake::FakeContainerManager;
    use crate::manifest::{InputKind, InputSpec, Manifest};
    use crate::store::Store;

    /// Keyed by `app_id`; every version of an app resolves to the same
    /// manifest, which is all these tests need.
    struct MapManifestSource(std::collections::HashMap<String, Manifest>);

    #[async_trait::async_trait]
    impl ManifestSource for MapManifestSource {
        async fn load(&self, app_id: &str, _app_version: &str) -> EngineResult<Manifest> {
            self.0
                .get(app_id)
                .cloned()
                .ok_or_else(|| crate::error::EngineError::fatal(format!("no manifest for {app_id}")))
        }
    }

    fn manifest(app_id: &str) -> Manifest {
        Manifest {
            app_id: app_id.to_string(),
            app_name: app_id.to_string(),
            app_version: "1.0.0".into(),
            inputs: Vec::new(),
            volumes: Vec::new(),
            devices: Vec::new(),
            env: Default::default(),
            script: String::new(),
            timeout_sec: None,
            privileged: false,
            ostemplate: Some("local:vztmpl/debian-12.tar.zst".into()),
            recommended_cores: Some(2),
            recommended_memory_mb: Some(512),
            recommended_disk_gb: Some(8),
        }
    }

    async fn test_api(manifests: MapManifestSource) -> EngineApi {
        let store = Store::connect_in_memory().await.unwrap();
        let container = Arc::new(FakeContainerManager::new());
        let manifests: Arc<dyn ManifestSource> = Arc::new(manifests);
        let config = EngineConfig::default().worker;
        let engine = JobEngine::new(store, container, manifests.clone(), config, std::env::temp_dir());
        EngineApi::new(engine, manifests, "/run/docktail/helper.sock".into())
    }

    fn stack_request(apps: Vec<StackAppRequest>) -> CreateStackRequest {
        CreateStackRequest {
            stack_name: "my-stack".into(),
            node: "pve".into(),
            storage: "local-lvm".into(),
            bridge: "vmbr0".into(),
            pool: None,
            cores: 0,
            memory_mb: 0,
            disk_gb: 0,
            onboot: false,
            hostname: "my-stack".into(),
            ip_address: None,
            bind_mounts: Vec::new(),
            apps,
        }
    }

    #[tokio::test]
    async fn validate_stack_sums_recommended_resources_across_apps() {
        let mut manifests = std::collections::HashMap::new();
        manifests.insert("redis".to_string(), manifest("redis"));
        manifests.insert("grafana".to_string(), manifest("grafana"));
        let api = test_api(MapManifestSource(manifests)).await;

        let req = stack_request(vec![
            StackAppRequest { app_id: "redis".into(), app_version: "1.0.0".into(), inputs: HashMap::new() },
            StackAppRequest { app_id: "grafana".into(), app_version: "1.0.0".into(), inputs: HashMap::new() },
        ]);

        let resp = api.validate_stack(&req).await;
        assert!(resp.valid);
        assert!(resp.errors.is_empty());
        assert_eq!(resp.recommended_resources.cores, 4);
        assert_eq!(resp.recommended_resources.memory_mb, 1024);
        assert_eq!(resp.recommended_resources.disk_gb, 16);
        assert_eq!(resp.ostemplate.as_deref(), Some("local:vztmpl/debian-12.tar.zst"));
    }

    #[tokio::test]
    async fn validate_stack_falls_back_to_defaults_when_manifest_omits_hints() {
        let mut m = manifest("redis");
        m.recommended_cores = None;
        m.recommended_memory_mb = None;
        m.recommended_disk_gb = None;
        let mut manifests = std::collections::HashMap::new();
        manifests.insert("redis".to_string(), m);
        let api = test_api(MapManifestSource(manifests)).await;

        let req = stack_request(vec![StackAppRequest {
            app_id: "redis".into(),
            app_version: "1.0.0".into(),
            inputs: HashMap::new(),
        }]);

        let resp = api.validate_stack(&req).await;
        assert_eq!(resp.recommended_resources.cores, DEFAULT_APP_CORES);
        assert_eq!(resp.recommended_resources.memory_mb, DEFAULT_APP_MEMORY_MB);
        assert_eq!(resp.recommended_resources.disk_gb, DEFAULT_APP_DISK_GB);
    }

    #[tokio::test]
    async fn validate_stack_reports_missing_required_inputs_as_errors() {
        let mut m = manifest("redis");
        m.inputs.push(InputSpec {
            key: "password".into(),
            kind: InputKind::String,
            required: true,
            secret: true,
            default: None,
            regex: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            enum_values: Vec::new(),
            show_when: None,
        });
        let mut manifests = std::collections::HashMap::new();
        manifests.insert("redis".to_string(), m);
        let api = test_api(MapManifestSource(manifests)).await;

        let req = stack_request(vec![StackAppRequest {
            app_id: "redis".into(),
            app_version: "1.0.0".into(),
            inputs: HashMap::new(),
        }]);

        let resp = api.validate_stack(&req).await;
        assert!(!resp.valid);
        assert_eq!(resp.errors.len(), 1);
    }

    #[tokio::test]
    async fn validate_stack_reports_unresolvable_manifests_as_errors() {
        let api = test_api(MapManifestSource(std::collections::HashMap::new())).await;
        let req = stack_request(vec![StackAppRequest {
            app_id: "missing-app".into(),
            app_version: "1.0.0".into(),
            inputs: HashMap::new(),
        }]);

        let resp = api.validate_stack(&req).await;
        assert!(!resp.valid);
        assert_eq!(resp.errors.len(), 1);
    }

    #[tokio::test]
    async fn start_install_enqueues_a_queued_install_job() {
        let mut manifests = std::collections::HashMap::new();
        manifests.insert("redis".to_string(), manifest("redis"));
        let api = test_api(MapManifestSource(manifests)).await;

        let req = StartInstallRequest {
            app_id: "redis".into(),
            app_name: "Redis".into(),
            app_version: "1.0.0".into(),
            node: "pve".into(),
            storage: "local-lvm".into(),
            bridge: "vmbr0".into(),
            pool: None,
            cores: 1,
            memory_mb: 512,
            disk_gb: 4,
            onboot: false,
            unprivileged: true,
            hostname: "redis".into(),
            ip_address: None,
            inputs: HashMap::new(),
            bind_mounts: Vec::new(),
            volume_storages: HashMap::new(),
            devices: Vec::new(),
            env_vars: HashMap::new(),
        };
        let job = api.start_install(req).await.unwrap();
        assert_eq!(job.job_type, JobType::Install);
        assert_eq!(job.state, crate::store::models::JobState::Queued);
        assert!(job.install_id.is_some());

        let fetched = api.get_job(&job.id).await.unwrap();
        assert_eq!(fetched.id, job.id);
    }

    #[tokio::test]
    async fn get_install_degrades_to_no_live_status_when_container_manager_has_nothing_for_the_ctid() {
        let api = test_api(MapManifestSource(std::collections::HashMap::new())).await;
        api.engine
            .store
            .upsert_install(crate::store::installs::UpsertInstall {
                id: "install-1".into(),
                app_id: "redis".into(),
                app_name: "Redis".into(),
                app_version: "1.0.0".into(),
                ctid: 500,
                node: "pve".into(),
                pool: None,
                storage: "local-lvm".into(),
                bridge: "vmbr0".into(),
                hostname: "redis".into(),
                ip_address: None,
                hwaddr: "02:00:00:00:00:01".into(),
                onboot: false,
                unprivileged: true,
                status: crate::store::models::InstallStatus::Running,
                inputs: HashMap::new(),
                outputs: HashMap::new(),
                devices: Vec::new(),
                env_vars: HashMap::new(),
                mount_points: Vec::new(),
            })
            .await
            .unwrap();

        let detail = api.get_install("install-1").await.unwrap();
        assert_eq!(detail.install.ctid, 500);
        assert!(detail.live_status.is_none(), "no fake container was ever created for ctid 500");
    }
}
