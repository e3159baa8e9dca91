//! Job and JobLog operations (spec §4.4, §4.5.2 exclusion, §8 property 2).

use chrono::Utc;

use crate::error::{EngineError, EngineResult};

use super::models::{Job, JobLog, JobRow, JobState, JobType, LogLevel};
use super::{encode, job_type_str, Store};

pub struct NewJob {
    pub id: String,
    pub job_type: JobType,
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub install_id: Option<String>,
    pub stack_id: Option<String>,
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
    pub inputs: std::collections::HashMap<String, String>,
    pub bind_mounts: Vec<String>,
    pub volume_storages: std::collections::HashMap<String, String>,
    pub extra_mounts: Vec<String>,
    pub devices: Vec<String>,
    pub env_vars: std::collections::HashMap<String, String>,
}

impl Store {
    /// Inserts the job row inside a transaction that first asserts no other
    /// non-terminal job exists for the same `install_id` (spec §4.5.2,
    /// §8 property 3). Returns `ErrorKind::Conflict` without writing anything
    /// if the exclusion invariant would be violated.
    pub async fn create_job(&self, new: NewJob) -> EngineResult<Job> {
        let mut tx = self.pool.begin().await?;

        if let Some(install_id) = &new.install_id {
            let active: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM jobs WHERE install_id = ? AND state NOT IN ('completed','cancelled','failed')",
            )
            .bind(install_id)
            .fetch_one(&mut *tx)
            .await?;
            if active > 0 {
                return Err(EngineError::conflict(format!(
                    "install {install_id} already has an active job"
                )));
            }
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO jobs (id, job_type, app_id, app_name, app_version, ctid, install_id,
                stack_id, state, cores, memory_mb, disk_gb, storage, bridge, pool, node, onboot,
                unprivileged, hostname, ip_address, inputs_json, bind_mounts_json,
                volume_storages_json, extra_mounts_json, devices_json, env_vars_json,
                outputs_json, error, created_at, started_at, completed_at, cancel_requested)
             VALUES (?, ?, ?, ?, ?, 0, ?, ?, 'queued', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '{}', '', ?, NULL, NULL, 0)",
        )
        .bind(&new.id)
        .bind(job_type_str(new.job_type))
        .bind(&new.app_id)
        .bind(&new.app_name)
        .bind(&new.app_version)
        .bind(&new.install_id)
        .bind(&new.stack_id)
        .bind(new.cores as i64)
        .bind(new.memory_mb as i64)
        .bind(new.disk_gb as i64)
        .bind(&new.storage)
        .bind(&new.bridge)
        .bind(&new.pool)
        .bind(&new.node)
        .bind(new.onboot)
        .bind(new.unprivileged)
        .bind(&new.hostname)
        .bind(&new.ip_address)
        .bind(encode(&new.inputs)?)
        .bind(encode(&new.bind_mounts)?)
        .bind(encode(&new.volume_storages)?)
        .bind(encode(&new.extra_mounts)?)
        .bind(encode(&new.devices)?)
        .bind(encode(&new.env_vars)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.get_job(&new.id).await
    }

    pub async fn get_job(&self, id: &str) -> EngineResult<Job> {
        let row: JobRow = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::fatal(format!("job not found: {id}")))?;
        Store::row_to_job(row)
    }

    pub async fn list_jobs(&self, install_id: Option<&str>) -> EngineResult<Vec<Job>> {
        let rows: Vec<JobRow> = if let Some(install_id) = install_id {
            sqlx::query_as("SELECT * FROM jobs WHERE install_id = ? ORDER BY created_at DESC")
                .bind(install_id)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as("SELECT * FROM jobs ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?
        };
        rows.into_iter().map(Store::row_to_job).collect()
    }

    /// Sets `ctid` on a job once allocated (spec §3 invariant: `ctid>0`
    /// after the `allocating` transition completes).
    pub async fn set_job_ctid(&self, id: &str, ctid: u32) -> EngineResult<()> {
        sqlx::query("UPDATE jobs SET ctid = ? WHERE id = ?")
            .bind(ctid as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_job_hostname_ip(
        &self,
        id: &str,
        hostname: Option<&str>,
        ip: Option<&str>,
    ) -> EngineResult<()> {
        sqlx::query("UPDATE jobs SET hostname = COALESCE(?, hostname), ip_address = COALESCE(?, ip_address) WHERE id = ?")
            .bind(hostname)
            .bind(ip)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_job_outputs(
        &self,
        id: &str,
        outputs: &std::collections::HashMap<String, String>,
    ) -> EngineResult<()> {
        sqlx::query("UPDATE jobs SET outputs_json = ? WHERE id = ?")
            .bind(encode(outputs)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Transitions `state`, stamping `started_at`/`completed_at` per the
    /// invariant `completed_at set <=> state terminal` (spec §3). Records
    /// `error` when transitioning into a failure/cancellation state.
    pub async fn update_job_state(
        &self,
        id: &str,
        state: JobState,
        error: Option<&str>,
    ) -> EngineResult<()> {
        let now = Utc::now();
        let is_terminal = state.is_terminal();
        sqlx::query(
            "UPDATE jobs SET state = ?,
                started_at = CASE WHEN started_at IS NULL THEN ? ELSE started_at END,
                completed_at = CASE WHEN ? THEN ? ELSE completed_at END,
                error = COALESCE(?, error)
             WHERE id = ?",
        )
        .bind(state.as_str())
        .bind(now)
        .bind(is_terminal)
        .bind(now)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_cancel_requested(&self, id: &str) -> EngineResult<()> {
        sqlx::query("UPDATE jobs SET cancel_requested = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn is_cancel_requested(&self, id: &str) -> EngineResult<bool> {
        let flag: bool = sqlx::query_scalar("SELECT cancel_requested FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(flag)
    }

    /// Appends one log line, assigning `seq` as `MAX(seq)+1` inside the same
    /// transaction as the insert so ordering survives interleaved writers
    /// even though SQLite's rowid alone would not guarantee gap-free
    /// per-job sequencing across restarts (spec §4.4, §8 property 2).
    pub async fn append_log(&self, job_id: &str, level: LogLevel, message: &str) -> EngineResult<i64> {
        let mut tx = self.pool.begin().await?;
        let next_seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM job_logs WHERE job_id = ?")
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO job_logs (job_id, seq, timestamp, level, message) VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(job_id)
        .bind(next_seq)
        .bind(Utc::now())
        .bind(level.as_str())
        .bind(message)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    /// `GetLogsSince` — guarantees no duplicates and no gaps up to the
    /// returned `last_id` (spec §6.1, §8 property 2).
    pub async fn get_logs_since(&self, job_id: &str, since_id: i64) -> EngineResult<(Vec<JobLog>, i64)> {
        let rows: Vec<JobLog> = sqlx::query_as(
            "SELECT id, job_id, timestamp, level, message FROM job_logs WHERE job_id = ? AND id > ? ORDER BY id ASC",
        )
        .bind(job_id)
        .bind(since_id)
        .fetch_all(&self.pool)
        .await?;
        let last_id = rows.last().map(|r| r.id).unwrap_or(since_id);
        Ok((rows, last_id))
    }
}
