//! `JobEngine` (spec §4.5.2): owns the Store, the `ContainerManager`, the log
//! channel, and the manifest source; exposes `submit_*` entry points the
//! outer façade calls to enqueue work, and a bounded worker pool that drains
//! the queue. One process, one engine, one queue (spec §1's scale target).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::container::ContainerManager;
use crate::error::{EngineError, EngineResult};
use crate::log_channel::LogChannel;
use crate::manifest::ManifestSource;
use crate::store::jobs::NewJob;
use crate::store::models::{Install, Job, JobLog, JobType};
use crate::store::Store;

use super::uninstall::KEEP_VOLUMES_INPUT_KEY;

pub struct JobEngine {
    pub(crate) store: Store,
    pub(crate) container: Arc<dyn ContainerManager>,
    pub(crate) log: LogChannel,
    pub(crate) manifests: Arc<dyn ManifestSource>,
    pub(crate) config: WorkerConfig,
    pub(crate) scratch_dir: PathBuf,
    pub(crate) ctid_locks: dashmap::DashMap<u32, Arc<Mutex<()>>>,
    pub(crate) active_workers: AtomicUsize,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl JobEngine {
    pub fn new(
        store: Store,
        container: Arc<dyn ContainerManager>,
        manifests: Arc<dyn ManifestSource>,
        config: WorkerConfig,
        scratch_dir: PathBuf,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            log: LogChannel::new(store.clone()),
            store,
            container,
            manifests,
            config,
            scratch_dir,
            ctid_locks: dashmap::DashMap::new(),
            active_workers: AtomicUsize::new(0),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
        })
    }

    /// Spawns `config.pool_size` workers draining the shared queue — a
    /// bounded pool rather than one task per job (spec §4.5.2).
    pub fn spawn_workers(self: &Arc<Self>) {
        for _ in 0..self.config.pool_size {
            let engine = self.clone();
            tokio::spawn(async move { super::worker::run(engine).await });
        }
    }

    pub(crate) async fn dequeue(&self) -> Option<String> {
        self.queue_rx.lock().await.recv().await
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_tx.len()
    }

    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    pub fn active_worker_count(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_worker_active(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_worker_idle(&self) {
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub async fn store_healthy(&self) -> bool {
        self.store.ping().await.is_ok()
    }

    /// Per-ctid exclusion (spec §8 property 3 extended to lifecycle ops):
    /// two jobs targeting the same container never run their container
    /// operations concurrently, even across different job types.
    pub(crate) fn lock_for_ctid(&self, ctid: u32) -> Arc<Mutex<()>> {
        self.ctid_locks.entry(ctid).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn enqueue(&self, job: Job) -> EngineResult<Job> {
        self.queue_tx
            .send(job.id.clone())
            .map_err(|_| EngineError::fatal("worker queue closed"))?;
        Ok(job)
    }

    pub async fn submit_install(&self, new: NewJob) -> EngineResult<Job> {
        let job = self.store.create_job(new).await?;
        self.enqueue(job)
    }

    /// Reinstall drives the same pipeline as Install; `allocating`/`creating`
    /// already reuse the prior Install's hwaddr and volumes by `install_id`.
    pub async fn submit_reinstall(&self, new: NewJob) -> EngineResult<Job> {
        self.submit_install(new).await
    }

    pub async fn submit_uninstall(&self, install_id: &str, keep_volumes: bool) -> EngineResult<Job> {
        let install = self.store.get_install(install_id).await?;
        let mut inputs = HashMap::new();
        inputs.insert(KEEP_VOLUMES_INPUT_KEY.to_string(), keep_volumes.to_string());
        let job = self
            .store
            .create_job(lifecycle_new_job(JobType::Uninstall, &install, install_id, inputs))
            .await?;
        self.enqueue(job)
    }

    pub async fn submit_update(&self, new: NewJob) -> EngineResult<Job> {
        let job = self.store.create_job(new).await?;
        self.enqueue(job)
    }

    pub async fn submit_start(&self, install_id: &str) -> EngineResult<Job> {
        self.submit_lifecycle(JobType::Start, install_id).await
    }

    pub async fn submit_stop(&self, install_id: &str) -> EngineResult<Job> {
        self.submit_lifecycle(JobType::Stop, install_id).await
    }

    pub async fn submit_restart(&self, install_id: &str) -> EngineResult<Job> {
        self.submit_lifecycle(JobType::Restart, install_id).await
    }

    async fn submit_lifecycle(&self, job_type: JobType, install_id: &str) -> EngineResult<Job> {
        let install = self.store.get_install(install_id).await?;
        let job = self
            .store
            .create_job(lifecycle_new_job(job_type, &install, install_id, HashMap::new()))
            .await?;
        self.enqueue(job)
    }

    pub async fn submit_stack_install(&self, new: NewJob) -> EngineResult<Job> {
        let job = self.store.create_job(new).await?;
        self.enqueue(job)
    }

    pub async fn submit_stack_uninstall(&self, stack_id: &str) -> EngineResult<Job> {
        let stack = self.store.get_stack(stack_id).await?;
        let job = self
            .store
            .create_job(NewJob {
                id: Uuid::new_v4().to_string(),
                job_type: JobType::StackUninstall,
                app_id: stack.id.clone(),
                app_name: stack.name.clone(),
                app_version: String::new(),
                install_id: None,
                stack_id: Some(stack_id.to_string()),
                cores: 0,
                memory_mb: 0,
                disk_gb: 0,
                storage: String::new(),
                bridge: String::new(),
                pool: None,
                node: String::new(),
                onboot: false,
                unprivileged: true,
                hostname: stack.name.clone(),
                ip_address: None,
                inputs: HashMap::new(),
                bind_mounts: Vec::new(),
                volume_storages: HashMap::new(),
                extra_mounts: Vec::new(),
                devices: Vec::new(),
                env_vars: HashMap::new(),
            })
            .await?;
        self.enqueue(job)
    }

    pub async fn cancel(&self, job_id: &str) -> EngineResult<()> {
        self.store.set_cancel_requested(job_id).await
    }

    pub async fn get_job(&self, job_id: &str) -> EngineResult<Job> {
        self.store.get_job(job_id).await
    }

    pub async fn list_jobs(&self, install_id: Option<&str>) -> EngineResult<Vec<Job>> {
        self.store.list_jobs(install_id).await
    }

    pub async fn get_logs_since(&self, job_id: &str, since_id: i64) -> EngineResult<(Vec<JobLog>, i64)> {
        self.store.get_logs_since(job_id, since_id).await
    }

    pub async fn get_install(&self, install_id: &str) -> EngineResult<Install> {
        self.store.get_install(install_id).await
    }

    pub async fn container_status(&self, ctid: u32) -> EngineResult<crate::container::types::StatusDetail> {
        self.container
            .status(ctid)
            .await
            .map_err(|e| EngineError::transient(format!("status failed: {e}")))
    }

    pub async fn list_installs(&self) -> EngineResult<Vec<Install>> {
        self.store.list_installs().await
    }

    pub fn log_channel(&self) -> &LogChannel {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fake::FakeContainerManager;
    use crate::manifest::Manifest;
    use crate::store::installs::UpsertInstall;
    use crate::store::models::InstallStatus;

    async fn test_engine() -> Arc<JobEngine> {
        let store = Store::connect_in_memory().await.unwrap();
        let container = Arc::new(FakeContainerManager::new());
        let manifests = Arc::new(NoopManifestSource);
        let config = crate::config::EngineConfig::default().worker;
        JobEngine::new(store, container, manifests, config, std::env::temp_dir())
    }

    struct NoopManifestSource;

    #[async_trait::async_trait]
    impl ManifestSource for NoopManifestSource {
        async fn load(&self, _app_id: &str, _app_version: &str) -> EngineResult<Manifest> {
            Err(EngineError::fatal("no manifests in this test double"))
        }
    }

    fn new_job(id: &str) -> NewJob {
        NewJob {
            id: id.to_string(),
            job_type: JobType::Install,
            app_id: "redis".into(),
            app_name: "Redis".into(),
            app_version: "1.0.0".into(),
            install_id: Some(format!("install-{id}")),
            stack_id: None,
            cores: 1,
            memory_mb: 512,
            disk_gb: 4,
            storage: "local-lvm".into(),
            bridge: "vmbr0".into(),
            pool: None,
            node: "pve".into(),
            onboot: false,
            unprivileged: true,
            hostname: "redis".into(),
            ip_address: None,
            inputs: HashMap::new(),
            bind_mounts: Vec::new(),
            volume_storages: HashMap::new(),
            extra_mounts: Vec::new(),
            devices: Vec::new(),
            env_vars: HashMap::new(),
        }
    }

    async fn seed_install(engine: &JobEngine, id: &str, ctid: u32) {
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
                status: InstallStatus::Running,
                inputs: HashMap::new(),
                outputs: HashMap::new(),
                devices: Vec::new(),
                env_vars: HashMap::new(),
                mount_points: Vec::new(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn submit_install_persists_and_enqueues() {
        let engine = test_engine().await;
        let job = engine.submit_install(new_job("job-1")).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(engine.queue_depth(), 1);
        let dequeued = engine.dequeue().await.unwrap();
        assert_eq!(dequeued, job.id);
        assert_eq!(engine.queue_depth(), 0);
    }

    #[tokio::test]
    async fn submit_lifecycle_jobs_resolve_install_and_enqueue() {
        let engine = test_engine().await;
        seed_install(&engine, "install-1", 100).await;

        let job = engine.submit_start("install-1").await.unwrap();
        assert_eq!(job.job_type, JobType::Start);
        assert_eq!(job.ctid, 100);
        assert_eq!(job.install_id.as_deref(), Some("install-1"));
    }

    #[tokio::test]
    async fn submit_uninstall_carries_keep_volumes_flag() {
        let engine = test_engine().await;
        seed_install(&engine, "install-2", 101).await;

        let job = engine.submit_uninstall("install-2", true).await.unwrap();
        assert_eq!(job.job_type, JobType::Uninstall);
        assert_eq!(job.inputs.get(KEEP_VOLUMES_INPUT_KEY), Some(&"true".to_string()));
    }

    #[tokio::test]
    async fn lock_for_ctid_returns_the_same_mutex_for_repeated_calls() {
        let engine = test_engine().await;
        let a = engine.lock_for_ctid(42);
        let b = engine.lock_for_ctid(42);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn active_worker_counters_track_mark_active_and_idle() {
        let engine = test_engine().await;
        assert_eq!(engine.active_worker_count(), 0);
        engine.mark_worker_active();
        engine.mark_worker_active();
        assert_eq!(engine.active_worker_count(), 2);
        engine.mark_worker_idle();
        assert_eq!(engine.active_worker_count(), 1);
    }

    #[tokio::test]
    async fn store_healthy_reports_true_for_a_reachable_store() {
        let engine = test_engine().await;
        assert!(engine.store_healthy().await);
    }

    #[tokio::test]
    async fn pool_size_reflects_worker_config() {
        let engine = test_engine().await;
        assert_eq!(engine.pool_size(), crate::config::EngineConfig::default().worker.pool_size);
    }
}

fn lifecycle_new_job(
    job_type: JobType,
    install: &Install,
    install_id: &str,
    inputs: HashMap<String, String>,
) -> NewJob {
    NewJob {
        id: Uuid::new_v4().to_string(),
        job_type,
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
        inputs,
        bind_mounts: Vec::new(),
        volume_storages: HashMap::new(),
        extra_mounts: Vec::new(),
        devices: install.devices.clone(),
        env_vars: install.env_vars.clone(),
    }
}
