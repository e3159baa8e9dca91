//! Install operations (spec §4.4). `upsert_install` is the one multi-table
//! write that also inserts `MountPoint` rows atomically (spec §4.4
//! "Transactions": "install completed" writes Job terminal state + Install +
//! MountPoints).

use chrono::Utc;

use crate::error::{EngineError, EngineResult};

use super::models::{Install, InstallRow, InstallStatus, MountPoint};
use super::{encode, Store};

pub struct UpsertInstall {
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
    pub inputs: std::collections::HashMap<String, String>,
    pub outputs: std::collections::HashMap<String, String>,
    pub devices: Vec<String>,
    pub env_vars: std::collections::HashMap<String, String>,
    pub mount_points: Vec<MountPoint>,
}

impl Store {
    pub async fn upsert_install(&self, install: UpsertInstall) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO installs (id, app_id, app_name, app_version, ctid, node, pool, storage,
                bridge, hostname, ip_address, hwaddr, onboot, unprivileged, status, inputs_json,
                outputs_json, devices_json, env_vars_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                app_version = excluded.app_version,
                ctid = excluded.ctid,
                node = excluded.node,
                storage = excluded.storage,
                bridge = excluded.bridge,
                hostname = excluded.hostname,
                ip_address = excluded.ip_address,
                hwaddr = excluded.hwaddr,
                status = excluded.status,
                inputs_json = excluded.inputs_json,
                outputs_json = excluded.outputs_json,
                devices_json = excluded.devices_json,
                env_vars_json = excluded.env_vars_json,
                updated_at = excluded.updated_at",
        )
        .bind(&install.id)
        .bind(&install.app_id)
        .bind(&install.app_name)
        .bind(&install.app_version)
        .bind(install.ctid as i64)
        .bind(&install.node)
        .bind(&install.pool)
        .bind(&install.storage)
        .bind(&install.bridge)
        .bind(&install.hostname)
        .bind(&install.ip_address)
        .bind(&install.hwaddr)
        .bind(install.onboot)
        .bind(install.unprivileged)
        .bind(install.status.as_str())
        .bind(encode(&install.inputs)?)
        .bind(encode(&install.outputs)?)
        .bind(encode(&install.devices)?)
        .bind(encode(&install.env_vars)?)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for mp in &install.mount_points {
            sqlx::query(
                "INSERT INTO mount_points (install_id, idx, name, kind, mount_path, read_only,
                    volume_id, size_gb, storage, host_path)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(install_id, idx) DO UPDATE SET
                    volume_id = excluded.volume_id,
                    size_gb = excluded.size_gb,
                    storage = excluded.storage,
                    host_path = excluded.host_path",
            )
            .bind(&mp.install_id)
            .bind(mp.index as i64)
            .bind(&mp.name)
            .bind(match mp.kind {
                super::models::MountPointKind::Volume => "volume",
                super::models::MountPointKind::Bind => "bind",
            })
            .bind(&mp.mount_path)
            .bind(mp.read_only)
            .bind(&mp.volume_id)
            .bind(mp.size_gb.map(|v| v as i64))
            .bind(&mp.storage)
            .bind(&mp.host_path)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_install(&self, id: &str) -> EngineResult<Install> {
        let row: InstallRow = sqlx::query_as("SELECT * FROM installs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::fatal(format!("install not found: {id}")))?;
        Store::row_to_install(row)
    }

    pub async fn list_installs(&self) -> EngineResult<Vec<Install>> {
        let rows: Vec<InstallRow> = sqlx::query_as("SELECT * FROM installs ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Store::row_to_install).collect()
    }

    /// Preserves the row for reinstall (spec §4.4): flips `status` only.
    pub async fn mark_install_uninstalled(&self, id: &str) -> EngineResult<()> {
        sqlx::query("UPDATE installs SET status = 'uninstalled', updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_install_status(&self, id: &str, status: InstallStatus) -> EngineResult<()> {
        sqlx::query("UPDATE installs SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
