//! Fake — test double for `ContainerManager`. Deterministic in-memory state,
//! grounded on the teacher's `FakeDocker` (seed-then-assert style, one
//! `Mutex<Inner>` guarding everything).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::types::{
    ContainerError, ContainerState, CreateOpts, DeviceDescriptor, ExecOutcome, StatusDetail,
    StorageInfo,
};
use super::ContainerManager;

#[derive(Clone, Debug)]
pub struct FakeContainer {
    pub ctid: u32,
    pub state: ContainerState,
    pub hostname: String,
}

#[derive(Default)]
struct Inner {
    next_ctid: u32,
    containers: HashMap<u32, FakeContainer>,
    /// Script the fake `exec`/`exec_stream` pretends to run: lines to emit
    /// plus the exit code, seeded per test case.
    exec_script: Vec<String>,
    exec_exit_code: i32,
}

pub struct FakeContainerManager {
    inner: Mutex<Inner>,
}

impl FakeContainerManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_ctid: 100,
                ..Default::default()
            }),
        }
    }

    pub async fn set_exec_script(&self, lines: Vec<String>, exit_code: i32) {
        let mut inner = self.inner.lock().await;
        inner.exec_script = lines;
        inner.exec_exit_code = exit_code;
    }

    pub async fn contains(&self, ctid: u32) -> bool {
        self.inner.lock().await.containers.contains_key(&ctid)
    }
}

impl Default for FakeContainerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerManager for FakeContainerManager {
    async fn allocate_ctid(&self) -> Result<u32, ContainerError> {
        let mut inner = self.inner.lock().await;
        let ctid = inner.next_ctid;
        inner.next_ctid += 1;
        Ok(ctid)
    }

    async fn create(&self, opts: CreateOpts) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock().await;
        inner.containers.insert(
            opts.ctid,
            FakeContainer {
                ctid: opts.ctid,
                state: ContainerState::Stopped,
                hostname: opts.hostname,
            },
        );
        Ok(())
    }

    async fn start(&self, ctid: u32) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock().await;
        let c = inner.containers.get_mut(&ctid).ok_or(ContainerError::NotFound(ctid))?;
        c.state = ContainerState::Running;
        Ok(())
    }

    async fn stop(&self, ctid: u32) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock().await;
        let c = inner.containers.get_mut(&ctid).ok_or(ContainerError::NotFound(ctid))?;
        c.state = ContainerState::Stopped;
        Ok(())
    }

    async fn shutdown(&self, ctid: u32, _timeout_secs: u64) -> Result<(), ContainerError> {
        self.stop(ctid).await
    }

    async fn destroy(&self, ctid: u32, _keep_volumes: bool) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock().await;
        inner
            .containers
            .remove(&ctid)
            .map(|_| ())
            .ok_or(ContainerError::NotFound(ctid))
    }

    async fn status(&self, ctid: u32) -> Result<StatusDetail, ContainerError> {
        let inner = self.inner.lock().await;
        let c = inner.containers.get(&ctid).ok_or(ContainerError::NotFound(ctid))?;
        Ok(StatusDetail {
            status: c.state,
            uptime_secs: 0,
            cpu: 0.0,
            cpus: 1,
            mem: 0,
            maxmem: 0,
            disk: 0,
            maxdisk: 0,
            netin: 0,
            netout: 0,
        })
    }

    async fn exec(&self, ctid: u32, _argv: &[String]) -> Result<ExecOutcome, ContainerError> {
        let inner = self.inner.lock().await;
        if !inner.containers.contains_key(&ctid) {
            return Err(ContainerError::NotFound(ctid));
        }
        Ok(ExecOutcome {
            output: inner.exec_script.join("\n"),
            exit_code: inner.exec_exit_code,
        })
    }

    async fn exec_stream(
        &self,
        ctid: u32,
        _argv: &[String],
        on_line: &mut (dyn FnMut(&str) + Send),
    ) -> Result<i32, ContainerError> {
        let inner = self.inner.lock().await;
        if !inner.containers.contains_key(&ctid) {
            return Err(ContainerError::NotFound(ctid));
        }
        for line in &inner.exec_script {
            on_line(line);
        }
        Ok(inner.exec_exit_code)
    }

    async fn push(&self, ctid: u32, _host_src: &str, _ct_dst: &str, _perms: Option<&str>) -> Result<(), ContainerError> {
        let inner = self.inner.lock().await;
        if inner.containers.contains_key(&ctid) {
            Ok(())
        } else {
            Err(ContainerError::NotFound(ctid))
        }
    }

    async fn configure_devices(&self, ctid: u32, _devices: &[DeviceDescriptor]) -> Result<(), ContainerError> {
        let inner = self.inner.lock().await;
        if inner.containers.contains_key(&ctid) {
            Ok(())
        } else {
            Err(ContainerError::NotFound(ctid))
        }
    }

    async fn mount_host_path(
        &self,
        ctid: u32,
        _index: u32,
        _host_path: &str,
        _ct_path: &str,
        _read_only: bool,
    ) -> Result<(), ContainerError> {
        let inner = self.inner.lock().await;
        if inner.containers.contains_key(&ctid) {
            Ok(())
        } else {
            Err(ContainerError::NotFound(ctid))
        }
    }

    async fn append_lxc_config(&self, ctid: u32, _lines: &[String]) -> Result<(), ContainerError> {
        let inner = self.inner.lock().await;
        if inner.containers.contains_key(&ctid) {
            Ok(())
        } else {
            Err(ContainerError::NotFound(ctid))
        }
    }

    async fn detach_mount_points(&self, ctid: u32, _indices: &[u32]) -> Result<(), ContainerError> {
        let inner = self.inner.lock().await;
        if inner.containers.contains_key(&ctid) {
            Ok(())
        } else {
            Err(ContainerError::NotFound(ctid))
        }
    }

    async fn get_storage_info(&self, storage_id: &str) -> Result<StorageInfo, ContainerError> {
        Ok(StorageInfo {
            kind: "dir".to_string(),
            path: format!("/fake/{storage_id}"),
            browsable: true,
        })
    }

    async fn resolve_template(&self, name: &str, storage: &str) -> Result<String, ContainerError> {
        Ok(format!("{storage}:vztmpl/{name}.tar.zst"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(ctid: u32) -> CreateOpts {
        CreateOpts {
            ctid,
            ostemplate: "local:vztmpl/debian-12.tar.zst".into(),
            storage: "local-lvm".into(),
            disk_gb: 4,
            cores: 1,
            memory_mb: 512,
            bridge: "vmbr0".into(),
            hwaddr: "02:00:00:00:00:01".into(),
            hostname: "test".into(),
            ip_config: None,
            unprivileged: true,
            pool: None,
            features: vec![],
            onboot: false,
            tags: vec![],
            mount_points: vec![],
        }
    }

    #[tokio::test]
    async fn allocate_ctid_is_monotonic_and_unique() {
        let fake = FakeContainerManager::new();
        let a = fake.allocate_ctid().await.unwrap();
        let b = fake.allocate_ctid().await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn lifecycle_start_stop_destroy() {
        let fake = FakeContainerManager::new();
        let ctid = fake.allocate_ctid().await.unwrap();
        fake.create(opts(ctid)).await.unwrap();
        fake.start(ctid).await.unwrap();
        assert_eq!(fake.status(ctid).await.unwrap().status, ContainerState::Running);
        fake.stop(ctid).await.unwrap();
        assert_eq!(fake.status(ctid).await.unwrap().status, ContainerState::Stopped);
        fake.destroy(ctid, false).await.unwrap();
        assert!(!fake.contains(ctid).await);
    }

    #[tokio::test]
    async fn exec_on_unknown_ctid_fails() {
        let fake = FakeContainerManager::new();
        let err = fake.exec(999, &["echo".into()]).await.unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(999)));
    }

    #[tokio::test]
    async fn exec_stream_replays_seeded_script_and_exit_code() {
        let fake = FakeContainerManager::new();
        let ctid = fake.allocate_ctid().await.unwrap();
        fake.create(opts(ctid)).await.unwrap();
        fake.set_exec_script(vec!["hello world".into()], 0).await;

        let mut lines = Vec::new();
        let code = fake
            .exec_stream(ctid, &["./install.sh".into()], &mut |line| lines.push(line.to_string()))
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(lines, vec!["hello world".to_string()]);
    }
}
