//! `/v1/pct/exec` and `/v1/pct/exec-stream` — one-shot and streaming command
//! execution inside a managed container (spec §6.2).

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http_body::Frame;
use http_body_util::StreamBody;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{HelperError, HelperResult};
use crate::state::SharedHelperState;
use crate::validate;

#[derive(Deserialize)]
pub struct ExecRequest {
    pub ctid: u32,
    pub command: Vec<String>,
}

#[derive(Serialize)]
pub struct ExecResponse {
    pub output: String,
    pub exit_code: i32,
}

async fn check(state: &SharedHelperState, req: &ExecRequest) -> HelperResult<()> {
    validate::validate_ctid_range(req.ctid)?;
    validate::validate_argv(&req.command)?;
    state.ctid_checker.require_managed(req.ctid).await
}

pub async fn exec(
    State(state): State<SharedHelperState>,
    Json(req): Json<ExecRequest>,
) -> HelperResult<Json<ExecResponse>> {
    check(&state, &req).await?;

    let _permit = state
        .locks
        .try_acquire_exec()
        .ok_or(HelperError::TooManyRequests)?;

    let output = Command::new("pct")
        .arg("exec")
        .arg(req.ctid.to_string())
        .arg("--")
        .args(&req.command)
        .output()
        .await
        .map_err(|e| HelperError::Internal(format!("exec failed: {e}")))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(Json(ExecResponse {
        output: combined,
        exit_code: output.status.code().unwrap_or(-1),
    }))
}

/// Streaming variant: chunked body, one line per chunk, exit code in the
/// `X-Exit-Code` trailer (spec §4.3, §6.2).
pub async fn exec_stream(
    State(state): State<SharedHelperState>,
    Json(req): Json<ExecRequest>,
) -> HelperResult<Response> {
    check(&state, &req).await?;

    let permit = state
        .locks
        .try_acquire_exec()
        .ok_or(HelperError::TooManyRequests)?;

    let mut child = Command::new("pct")
        .arg("exec")
        .arg(req.ctid.to_string())
        .arg("--")
        .args(&req.command)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| HelperError::Internal(format!("spawn failed: {e}")))?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Frame<bytes::Bytes>, std::io::Error>>(64);

    tokio::spawn(async move {
        let _permit = permit;
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        loop {
            tokio::select! {
                line = stdout_lines.next_line() => {
                    match line {
                        Ok(Some(mut l)) => { l.push('\n'); if tx.send(Ok(Frame::data(bytes::Bytes::from(l)))).await.is_err() { break; } }
                        Ok(None) => {}
                        Err(_) => break,
                    }
                }
                line = stderr_lines.next_line() => {
                    match line {
                        Ok(Some(mut l)) => { l.push('\n'); if tx.send(Ok(Frame::data(bytes::Bytes::from(l)))).await.is_err() { break; } }
                        Ok(None) => {}
                        Err(_) => break,
                    }
                }
                status = child.wait() => {
                    let code = status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1);
                    let mut trailers = HeaderMap::new();
                    if let Ok(v) = code.to_string().parse() {
                        trailers.insert("x-exit-code", v);
                    }
                    let _ = tx.send(Ok(Frame::trailers(trailers))).await;
                    break;
                }
            }
        }
    });

    let stream = tokio_stream::wrappers::ReceiverStream::new(rx);
    let body = Body::new(StreamBody::new(stream));

    Ok(Response::builder()
        .header("Transfer-Encoding", "chunked")
        .header("Trailer", "X-Exit-Code")
        .body(body)
        .map_err(|e| HelperError::Internal(e.to_string()))?
        .into_response())
}
