use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{HelperError, HelperResult};
use crate::state::SharedHelperState;
use crate::validate::{self, path_policy};

#[derive(Deserialize)]
pub struct MkdirRequest {
    pub path: String,
}

#[derive(Serialize)]
pub struct MkdirResponse {
    pub status: &'static str,
    pub path: String,
}

pub async fn mkdir(
    State(state): State<SharedHelperState>,
    Json(req): Json<MkdirRequest>,
) -> HelperResult<Json<MkdirResponse>> {
    let resolved = path_policy::resolve_and_check(&req.path, &state.config)?;
    tokio::fs::create_dir_all(&resolved)
        .await
        .map_err(|e| HelperError::Internal(format!("mkdir failed: {e}")))?;
    Ok(Json(MkdirResponse {
        status: "ok",
        path: resolved.display().to_string(),
    }))
}

#[derive(Deserialize)]
pub struct ChownRequest {
    pub path: String,
    pub uid: u32,
    pub gid: u32,
    pub recursive: bool,
}

#[derive(Serialize)]
pub struct StatusOk {
    pub status: &'static str,
}

pub async fn chown(
    State(state): State<SharedHelperState>,
    Json(req): Json<ChownRequest>,
) -> HelperResult<Json<StatusOk>> {
    validate::validate_chown(req.uid, req.gid)?;
    let resolved = path_policy::resolve_and_check(&req.path, &state.config)?;

    let mut cmd = tokio::process::Command::new("chown");
    if req.recursive {
        cmd.arg("-R");
    }
    cmd.arg(format!("{}:{}", req.uid, req.gid)).arg(&resolved);
    let status = cmd
        .status()
        .await
        .map_err(|e| HelperError::Internal(format!("chown failed: {e}")))?;
    if !status.success() {
        return Err(HelperError::Internal(format!("chown exited with {status}")));
    }
    Ok(Json(StatusOk { status: "ok" }))
}

#[derive(Deserialize)]
pub struct RmRequest {
    pub path: String,
}

pub async fn rm(
    State(state): State<SharedHelperState>,
    Json(req): Json<RmRequest>,
) -> HelperResult<Json<StatusOk>> {
    let resolved = path_policy::resolve_for_remove(&req.path, &state.config)?;

    let meta = tokio::fs::symlink_metadata(&resolved)
        .await
        .map_err(|e| HelperError::Internal(format!("stat failed: {e}")))?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(&resolved)
            .await
            .map_err(|e| HelperError::Internal(format!("rm failed: {e}")))?;
    } else {
        tokio::fs::remove_file(&resolved)
            .await
            .map_err(|e| HelperError::Internal(format!("rm failed: {e}")))?;
    }
    Ok(Json(StatusOk { status: "ok" }))
}
