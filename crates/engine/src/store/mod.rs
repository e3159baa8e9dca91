//! Job Store (C4, spec §4.4) — durable, transactional state behind a
//! `sqlx::SqlitePool`. Domain operations live in sibling modules (`jobs`,
//! `installs`, `mount_points`, `stacks`), mirroring the teacher's
//! one-struct-many-domain-files layout (`docker/client.rs` + `container.rs`
//! + `shell.rs`, all `impl DockerClient` blocks in separate files).

pub mod installs;
pub mod jobs;
pub mod models;
pub mod mount_points;
pub mod stacks;

use std::collections::HashMap;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{EngineError, EngineResult};
use models::{Job, JobRow, JobState, JobType, Install, InstallRow, InstallStatus};

#[derive(Debug, Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_path: &str, max_connections: u32) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(database_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn ping(&self) -> EngineResult<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn row_to_job(row: JobRow) -> EngineResult<Job> {
        Ok(Job {
            id: row.id,
            job_type: parse_job_type(&row.job_type)?,
            app_id: row.app_id,
            app_name: row.app_name,
            app_version: row.app_version,
            ctid: row.ctid as u32,
            install_id: row.install_id,
            stack_id: row.stack_id,
            state: JobState::from_str(&row.state)
                .ok_or_else(|| EngineError::fatal(format!("unknown job state: {}", row.state)))?,
            cores: row.cores as u32,
            memory_mb: row.memory_mb as u32,
            disk_gb: row.disk_gb as u32,
            storage: row.storage,
            bridge: row.bridge,
            pool: row.pool,
            node: row.node,
            onboot: row.onboot,
            unprivileged: row.unprivileged,
            hostname: row.hostname,
            ip_address: row.ip_address,
            inputs: decode_map(&row.inputs_json)?,
            bind_mounts: decode_vec(&row.bind_mounts_json)?,
            volume_storages: decode_map(&row.volume_storages_json)?,
            extra_mounts: decode_vec(&row.extra_mounts_json)?,
            devices: decode_vec(&row.devices_json)?,
            env_vars: decode_map(&row.env_vars_json)?,
            outputs: decode_map(&row.outputs_json)?,
            error: row.error,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            cancel_requested: row.cancel_requested,
        })
    }

    pub(crate) fn row_to_install(row: InstallRow) -> EngineResult<Install> {
        Ok(Install {
            id: row.id,
            app_id: row.app_id,
            app_name: row.app_name,
            app_version: row.app_version,
            ctid: row.ctid as u32,
            node: row.node,
            pool: row.pool,
            storage: row.storage,
            bridge: row.bridge,
            hostname: row.hostname,
            ip_address: row.ip_address,
            hwaddr: row.hwaddr,
            onboot: row.onboot,
            unprivileged: row.unprivileged,
            status: parse_install_status(&row.status)?,
            inputs: decode_map(&row.inputs_json)?,
            outputs: decode_map(&row.outputs_json)?,
            devices: decode_vec(&row.devices_json)?,
            env_vars: decode_map(&row.env_vars_json)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> EngineResult<String> {
    serde_json::to_string(value).map_err(|e| EngineError::fatal(format!("encode failed: {e}")))
}

fn decode_map(s: &str) -> EngineResult<HashMap<String, String>> {
    serde_json::from_str(s).map_err(|e| EngineError::fatal(format!("decode failed: {e}")))
}

fn decode_vec(s: &str) -> EngineResult<Vec<String>> {
    serde_json::from_str(s).map_err(|e| EngineError::fatal(format!("decode failed: {e}")))
}

fn parse_job_type(s: &str) -> EngineResult<JobType> {
    Ok(match s {
        "install" => JobType::Install,
        "uninstall" => JobType::Uninstall,
        "update" => JobType::Update,
        "reinstall" => JobType::Reinstall,
        "start" => JobType::Start,
        "stop" => JobType::Stop,
        "restart" => JobType::Restart,
        "stack_install" => JobType::StackInstall,
        "stack_uninstall" => JobType::StackUninstall,
        other => return Err(EngineError::fatal(format!("unknown job type: {other}"))),
    })
}

pub(crate) fn job_type_str(t: JobType) -> &'static str {
    match t {
        JobType::Install => "install",
        JobType::Uninstall => "uninstall",
        JobType::Update => "update",
        JobType::Reinstall => "reinstall",
        JobType::Start => "start",
        JobType::Stop => "stop",
        JobType::Restart => "restart",
        JobType::StackInstall => "stack_install",
        JobType::StackUninstall => "stack_uninstall",
    }
}

fn parse_install_status(s: &str) -> EngineResult<InstallStatus> {
    Ok(match s {
        "running" => InstallStatus::Running,
        "stopped" => InstallStatus::Stopped,
        "installing" => InstallStatus::Installing,
        "failed" => InstallStatus::Failed,
        "uninstalled" => InstallStatus::Uninstalled,
        other => return Err(EngineError::fatal(format!("unknown install status: {other}"))),
    })
}
