use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tokio::process::Command;

use crate::error::{HelperError, HelperResult};
use crate::routes::pct_push::StatusOk;
use crate::state::SharedHelperState;
use crate::validate::{self, pct_set};

#[derive(Deserialize)]
pub struct SetRequest {
    pub ctid: u32,
    pub option: String,
    pub value: String,
}

pub async fn set(
    State(state): State<SharedHelperState>,
    Json(req): Json<SetRequest>,
) -> HelperResult<Json<StatusOk>> {
    validate::validate_ctid_range(req.ctid)?;
    state.ctid_checker.require_managed(req.ctid).await?;
    let parsed = pct_set::validate_pct_set(&req.option, &req.value, &state.config)?;

    let _guard = state.locks.lock_ctid(req.ctid).await;

    let option_flag = format!("-{}", req.option.trim_start_matches('-'));
    let status = Command::new("pct")
        .arg("set")
        .arg(req.ctid.to_string())
        .arg(option_flag)
        .arg(&parsed.validated_value)
        .status()
        .await
        .map_err(|e| HelperError::Internal(format!("pct set failed: {e}")))?;
    if !status.success() {
        return Err(HelperError::Internal(format!(
            "pct set exited with {status}"
        )));
    }

    Ok(Json(StatusOk { status: "ok" }))
}
