use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{HelperError, HelperResult};
use crate::state::SharedHelperState;
use crate::validate::{self, path_policy};

#[derive(Deserialize)]
pub struct PushRequest {
    pub ctid: u32,
    pub src: String,
    pub dst: String,
    pub perms: Option<String>,
}

#[derive(Serialize)]
pub struct StatusOk {
    pub status: &'static str,
}

pub async fn push(
    State(state): State<SharedHelperState>,
    Json(req): Json<PushRequest>,
) -> HelperResult<Json<StatusOk>> {
    validate::validate_ctid_range(req.ctid)?;
    state.ctid_checker.require_managed(req.ctid).await?;
    let src = path_policy::resolve_push_source(&req.src, &state.config)?;

    if !req.dst.starts_with('/') {
        return Err(HelperError::BadRequest("dst must be absolute".into()));
    }

    let mut cmd = Command::new("pct");
    cmd.arg("push").arg(req.ctid.to_string()).arg(&src).arg(&req.dst);
    if let Some(perms) = &req.perms {
        cmd.arg("--perms").arg(perms);
    }
    let status = cmd
        .status()
        .await
        .map_err(|e| HelperError::Internal(format!("pct push failed: {e}")))?;
    if !status.success() {
        return Err(HelperError::Internal(format!(
            "pct push exited with {status}"
        )));
    }

    Ok(Json(StatusOk { status: "ok" }))
}
