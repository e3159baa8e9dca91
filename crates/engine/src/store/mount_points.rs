//! Mount point operations (spec §4.4). Split out from `installs.rs` even
//! though `upsert_install` already writes these rows, for the incremental
//! case: attaching/detaching a single volume without touching the parent
//! `installs` row.

use crate::error::EngineResult;

use super::models::{MountPoint, MountPointKind, MountPointRow};
use super::Store;

impl Store {
    pub async fn get_mount_points_for_install(&self, install_id: &str) -> EngineResult<Vec<MountPoint>> {
        let rows: Vec<MountPointRow> = sqlx::query_as(
            "SELECT * FROM mount_points WHERE install_id = ? ORDER BY idx ASC",
        )
        .bind(install_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_mount_point).collect()
    }

    pub async fn record_mount_point(&self, mp: &MountPoint) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO mount_points (install_id, idx, name, kind, mount_path, read_only,
                volume_id, size_gb, storage, host_path)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(install_id, idx) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                mount_path = excluded.mount_path,
                read_only = excluded.read_only,
                volume_id = excluded.volume_id,
                size_gb = excluded.size_gb,
                storage = excluded.storage,
                host_path = excluded.host_path",
        )
        .bind(&mp.install_id)
        .bind(mp.index as i64)
        .bind(&mp.name)
        .bind(kind_str(mp.kind))
        .bind(&mp.mount_path)
        .bind(mp.read_only)
        .bind(&mp.volume_id)
        .bind(mp.size_gb.map(|v| v as i64))
        .bind(&mp.storage)
        .bind(&mp.host_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Detaches a mount point. The backing `volumes` row, if any, is left
    /// untouched so its storage-level identity survives reattachment.
    pub async fn delete_mount_point(&self, install_id: &str, index: u32) -> EngineResult<()> {
        sqlx::query("DELETE FROM mount_points WHERE install_id = ? AND idx = ?")
            .bind(install_id)
            .bind(index as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn kind_str(kind: MountPointKind) -> &'static str {
    match kind {
        MountPointKind::Volume => "volume",
        MountPointKind::Bind => "bind",
    }
}

fn row_to_mount_point(row: MountPointRow) -> EngineResult<MountPoint> {
    let kind = match row.kind.as_str() {
        "volume" => MountPointKind::Volume,
        _ => MountPointKind::Bind,
    };
    Ok(MountPoint {
        install_id: row.install_id,
        index: row.idx as u32,
        name: row.name,
        kind,
        mount_path: row.mount_path,
        read_only: row.read_only,
        volume_id: row.volume_id,
        size_gb: row.size_gb.map(|v| v as u32),
        storage: row.storage,
        host_path: row.host_path,
    })
}
