//! Row structs for the Job Store (spec §3). These map directly onto the
//! `sqlx::FromRow` query results; JSON-shaped columns (maps, vectors) are
//! stored as TEXT and (de)serialized at the boundary.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Install,
    Uninstall,
    Update,
    Reinstall,
    Start,
    Stop,
    Restart,
    StackInstall,
    StackUninstall,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Validating,
    Allocating,
    Creating,
    Configuring,
    Starting,
    WaitingNetwork,
    PushingSdk,
    Executing,
    Finalizing,
    Completed,
    Cancelling,
    Cancelled,
    Failing,
    Failed,
    RollingBack,
    Stopping,
    DetachingVolumes,
    Destroying,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Validating => "validating",
            JobState::Allocating => "allocating",
            JobState::Creating => "creating",
            JobState::Configuring => "configuring",
            JobState::Starting => "starting",
            JobState::WaitingNetwork => "waiting_network",
            JobState::PushingSdk => "pushing_sdk",
            JobState::Executing => "executing",
            JobState::Finalizing => "finalizing",
            JobState::Completed => "completed",
            JobState::Cancelling => "cancelling",
            JobState::Cancelled => "cancelled",
            JobState::Failing => "failing",
            JobState::Failed => "failed",
            JobState::RollingBack => "rolling_back",
            JobState::Stopping => "stopping",
            JobState::DetachingVolumes => "detaching_volumes",
            JobState::Destroying => "destroying",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "queued" => JobState::Queued,
            "validating" => JobState::Validating,
            "allocating" => JobState::Allocating,
            "creating" => JobState::Creating,
            "configuring" => JobState::Configuring,
            "starting" => JobState::Starting,
            "waiting_network" => JobState::WaitingNetwork,
            "pushing_sdk" => JobState::PushingSdk,
            "executing" => JobState::Executing,
            "finalizing" => JobState::Finalizing,
            "completed" => JobState::Completed,
            "cancelling" => JobState::Cancelling,
            "cancelled" => JobState::Cancelled,
            "failing" => JobState::Failing,
            "failed" => JobState::Failed,
            "rolling_back" => JobState::RollingBack,
            "stopping" => JobState::Stopping,
            "detaching_volumes" => JobState::DetachingVolumes,
            "destroying" => JobState::Destroying,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub ctid: u32,
    pub install_id: Option<String>,
    pub stack_id: Option<String>,
    pub state: JobState,
    pub cores: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
    pub storage: String,
    pub bridge: String,
    pub pool: Option<String>,
    pub node: String,
    pub onboot: bool,
    pub unprivileged: bool,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub inputs: HashMap<String, String>,
    pub bind_mounts: Vec<String>,
    pub volume_storages: HashMap<String, String>,
    pub extra_mounts: Vec<String>,
    pub devices: Vec<String>,
    pub env_vars: HashMap<String, String>,
    pub outputs: HashMap<String, String>,
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
}

/// Raw row shape as read back from SQLite — JSON columns arrive as TEXT and
/// are decoded by `Store::row_to_job`, which is why this isn't `Job` itself.
#[derive(Debug, FromRow)]
pub struct JobRow {
    pub id: String,
    pub job_type: String,
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub ctid: i64,
    pub install_id: Option<String>,
    pub stack_id: Option<String>,
    pub state: String,
    pub cores: i64,
    pub memory_mb: i64,
    pub disk_gb: i64,
    pub storage: String,
    pub bridge: String,
    pub pool: Option<String>,
    pub node: String,
    pub onboot: bool,
    pub unprivileged: bool,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub inputs_json: String,
    pub bind_mounts_json: String,
    pub volume_storages_json: String,
    pub extra_mounts_json: String,
    pub devices_json: String,
    pub env_vars_json: String,
    pub outputs_json: String,
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct JobLog {
    pub id: i64,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Running,
    Stopped,
    Installing,
    Failed,
    Uninstalled,
}

impl InstallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStatus::Running => "running",
            InstallStatus::Stopped => "stopped",
            InstallStatus::Installing => "installing",
            InstallStatus::Failed => "failed",
            InstallStatus::Uninstalled => "uninstalled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Install {
    pub id: String,
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub ctid: u32,
    pub node: String,
    pub pool: Option<String>,
    pub storage: String,
    pub bridge: String,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub hwaddr: String,
    pub onboot: bool,
    pub unprivileged: bool,
    pub status: InstallStatus,
    pub inputs: HashMap<String, String>,
    pub outputs: HashMap<String, String>,
    pub devices: Vec<String>,
    pub env_vars: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct InstallRow {
    pub id: String,
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub ctid: i64,
    pub node: String,
    pub pool: Option<String>,
    pub storage: String,
    pub bridge: String,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub hwaddr: String,
    pub onboot: bool,
    pub unprivileged: bool,
    pub status: String,
    pub inputs_json: String,
    pub outputs_json: String,
    pub devices_json: String,
    pub env_vars_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountPointKind {
    Volume,
    Bind,
}

#[derive(Debug, Clone)]
pub struct MountPoint {
    pub install_id: String,
    pub index: u32,
    pub name: String,
    pub kind: MountPointKind,
    pub mount_path: String,
    pub read_only: bool,
    pub volume_id: Option<String>,
    pub size_gb: Option<u32>,
    pub storage: Option<String>,
    pub host_path: Option<String>,
}

#[derive(Debug, FromRow)]
pub struct MountPointRow {
    pub install_id: String,
    pub idx: i64,
    pub name: String,
    pub kind: String,
    pub mount_path: String,
    pub read_only: bool,
    pub volume_id: Option<String>,
    pub size_gb: Option<i64>,
    pub storage: Option<String>,
    pub host_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackApp {
    pub app_id: String,
    pub inputs: HashMap<String, String>,
    pub status: String,
    pub outputs: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Stack {
    pub id: String,
    pub name: String,
    pub ctid: u32,
    pub apps: Vec<StackApp>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct StackRow {
    pub id: String,
    pub name: String,
    pub ctid: i64,
    pub apps_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
