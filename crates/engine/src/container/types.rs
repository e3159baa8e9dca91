//! Shared request/response shapes for the `ContainerManager` capability
//! (spec §4.1). Kept separate from `mod.rs` the way the teacher splits
//! `DockerClient`'s struct/error from its domain-method files.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct CreateOpts {
    pub ctid: u32,
    pub ostemplate: String,
    pub storage: String,
    pub disk_gb: u32,
    pub cores: u32,
    pub memory_mb: u32,
    pub bridge: String,
    pub hwaddr: String,
    pub hostname: String,
    /// CIDR+gateway, or `None` for DHCP.
    pub ip_config: Option<IpConfig>,
    pub unprivileged: bool,
    pub pool: Option<String>,
    pub features: Vec<String>,
    pub onboot: bool,
    pub tags: Vec<String>,
    pub mount_points: Vec<MountPointOpt>,
}

#[derive(Debug, Clone)]
pub struct IpConfig {
    pub cidr: String,
    pub gateway: String,
}

#[derive(Debug, Clone)]
pub struct MountPointOpt {
    pub index: u32,
    pub mount_path: String,
    pub read_only: bool,
    pub source: MountSource,
}

#[derive(Debug, Clone)]
pub enum MountSource {
    /// `storage:size` volume spec, e.g. `local-lvm:8`.
    Volume { storage: String, size_gb: u32 },
    /// Reattach an existing managed disk by its storage-qualified id.
    ExistingVolume { volume_id: String },
    Bind { host_path: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContainerState {
    Running,
    Stopped,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct StatusDetail {
    pub status: ContainerState,
    pub uptime_secs: u64,
    pub cpu: f64,
    pub cpus: u32,
    pub mem: u64,
    pub maxmem: u64,
    pub disk: u64,
    pub maxdisk: u64,
    pub netin: u64,
    pub netout: u64,
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub output: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub path: String,
    pub gid: Option<u32>,
    pub mode: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageInfo {
    pub kind: String,
    pub path: String,
    pub browsable: bool,
}

pub type EnvMap = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container not found: ctid {0}")]
    NotFound(u32),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("proxmox task failed: {0}")]
    TaskFailed(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("helper rejected request: {0}")]
    Forbidden(String),
}
