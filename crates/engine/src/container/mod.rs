//! Container Manager (C1, spec §4.1) — the capability interface the job
//! engine drives containers through. `pct` implements it against the real
//! Proxmox CLI (delegating privileged operations to the helper); `fake`
//! implements it in memory for worker/step tests.

pub mod fake;
pub mod pct;
pub mod types;

use async_trait::async_trait;

use types::{
    ContainerError, CreateOpts, DeviceDescriptor, ExecOutcome, StatusDetail, StorageInfo,
};

#[async_trait]
pub trait ContainerManager: Send + Sync {
    async fn allocate_ctid(&self) -> Result<u32, ContainerError>;
    async fn create(&self, opts: CreateOpts) -> Result<(), ContainerError>;
    async fn start(&self, ctid: u32) -> Result<(), ContainerError>;
    async fn stop(&self, ctid: u32) -> Result<(), ContainerError>;
    async fn shutdown(&self, ctid: u32, timeout_secs: u64) -> Result<(), ContainerError>;
    async fn destroy(&self, ctid: u32, keep_volumes: bool) -> Result<(), ContainerError>;
    async fn status(&self, ctid: u32) -> Result<StatusDetail, ContainerError>;
    async fn exec(&self, ctid: u32, argv: &[String]) -> Result<ExecOutcome, ContainerError>;

    /// Streams combined stdout+stderr line-by-line via `on_line`, returning
    /// the final exit code once the command completes.
    async fn exec_stream(
        &self,
        ctid: u32,
        argv: &[String],
        on_line: &mut (dyn FnMut(&str) + Send),
    ) -> Result<i32, ContainerError>;

    async fn push(&self, ctid: u32, host_src: &str, ct_dst: &str, perms: Option<&str>) -> Result<(), ContainerError>;
    async fn configure_devices(&self, ctid: u32, devices: &[DeviceDescriptor]) -> Result<(), ContainerError>;
    async fn mount_host_path(
        &self,
        ctid: u32,
        index: u32,
        host_path: &str,
        ct_path: &str,
        read_only: bool,
    ) -> Result<(), ContainerError>;
    async fn append_lxc_config(&self, ctid: u32, lines: &[String]) -> Result<(), ContainerError>;
    async fn detach_mount_points(&self, ctid: u32, indices: &[u32]) -> Result<(), ContainerError>;
    async fn get_storage_info(&self, storage_id: &str) -> Result<StorageInfo, ContainerError>;
    async fn resolve_template(&self, name: &str, storage: &str) -> Result<String, ContainerError>;
}
