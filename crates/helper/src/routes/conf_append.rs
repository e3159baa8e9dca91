use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::error::{HelperError, HelperResult};
use crate::routes::pct_push::StatusOk;
use crate::state::SharedHelperState;
use crate::validate::{self, lxc_conf};

#[derive(Deserialize)]
pub struct ConfAppendRequest {
    pub ctid: u32,
    pub lines: Vec<String>,
}

pub async fn append(
    State(state): State<SharedHelperState>,
    Json(req): Json<ConfAppendRequest>,
) -> HelperResult<Json<StatusOk>> {
    validate::validate_ctid_range(req.ctid)?;
    state.ctid_checker.require_managed(req.ctid).await?;
    lxc_conf::validate_lines(&req.lines, &state.config)?;

    let _guard = state.locks.lock_ctid(req.ctid).await;

    let conf_path = format!("/etc/pve/lxc/{}.conf", req.ctid);
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(&conf_path)
        .await
        .map_err(|e| HelperError::Internal(format!("cannot open {conf_path}: {e}")))?;
    for line in &req.lines {
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| HelperError::Internal(e.to_string()))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| HelperError::Internal(e.to_string()))?;
    }

    Ok(Json(StatusOk { status: "ok" }))
}
