//! `POST /v1/update` — self-update the helper binary (spec §4.3, §6.2).
//!
//! The helper never downloads anything itself: the engine has already staged
//! a validated replacement binary at the fixed `update_binary_path`. This
//! route only verifies the staged file and execs it, detached, under a
//! single-slot lock so two concurrent update calls can't race.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::os::unix::fs::PermissionsExt;

use crate::error::{HelperError, HelperResult};
use crate::state::SharedHelperState;

#[derive(Serialize)]
pub struct UpdateResponse {
    pub status: &'static str,
}

pub async fn update(State(state): State<SharedHelperState>) -> HelperResult<Json<UpdateResponse>> {
    let _guard = state
        .locks
        .try_lock_update()
        .ok_or(HelperError::Conflict)?;

    let path = std::path::Path::new(&state.config.update_binary_path);
    let meta = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|e| HelperError::Forbidden(format!("update binary missing: {e}")))?;
    if meta.file_type().is_symlink() {
        return Err(HelperError::Forbidden(
            "update binary must not be a symlink".into(),
        ));
    }
    if !meta.is_file() {
        return Err(HelperError::Forbidden(
            "update binary is not a regular file".into(),
        ));
    }
    if meta.permissions().mode() & 0o111 == 0 {
        return Err(HelperError::Forbidden(
            "update binary is not executable".into(),
        ));
    }

    tracing::warn!(path = %path.display(), "starting detached self-update");

    tokio::process::Command::new(path)
        .process_group(0)
        .spawn()
        .map_err(|e| HelperError::Internal(format!("failed to spawn update binary: {e}")))?;

    Ok(Json(UpdateResponse { status: "ok" }))
}
