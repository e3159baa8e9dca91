//! `GET /v1/terminal` — interactive PTY session (spec §4.3, §4.6).
//!
//! Unlike every other route, this one hijacks the raw connection instead of
//! returning a JSON body: the response is a bare `200 OK` with
//! `Connection: Upgrade`, after which the socket carries opaque bytes in both
//! directions — container output going one way, keystrokes (and the
//! occasional inline resize frame) coming back. The caller on the other end
//! is `engine::terminal::bridge`, which relays those same bytes to a
//! WebSocket client; this module never interprets them except to recognize
//! a resize frame.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{HelperError, HelperResult};
use crate::pty::PtySession;
use crate::state::SharedHelperState;
use crate::validate;

#[derive(Deserialize)]
pub struct TerminalQuery {
    pub ctid: u32,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}
fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    24
}

/// A resize frame sent inline in the byte stream: `{"type":"resize","cols":N,"rows":N}\n`.
/// Detected by the leading `{` byte — every other byte on the wire is raw
/// terminal data, which by convention in this protocol never begins a line
/// with `{` (spec §4.3).
#[derive(Deserialize)]
struct ResizeFrame {
    cols: u16,
    rows: u16,
}

pub async fn terminal(
    State(state): State<SharedHelperState>,
    Query(query): Query<TerminalQuery>,
    mut req: Request<Body>,
) -> HelperResult<Response<Body>> {
    validate::validate_ctid_range(query.ctid)?;
    state.ctid_checker.require_managed(query.ctid).await?;
    validate::validate_shell(&query.shell)?;

    let permit = state
        .locks
        .try_acquire_terminal()
        .ok_or(HelperError::TooManyRequests)?;

    let ctid = query.ctid;
    let shell = query.shell.clone();
    let cols = query.cols;
    let rows = query.rows;

    let on_upgrade = hyper::upgrade::on(&mut req);

    tokio::spawn(async move {
        let _permit = permit;
        let upgraded = match on_upgrade.await {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(ctid, "terminal upgrade failed: {e}");
                return;
            }
        };
        if let Err(e) = run_session(ctid, &shell, cols, rows, upgraded).await {
            tracing::warn!(ctid, "terminal session ended with error: {e}");
        }
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Connection", "Upgrade")
        .header("Upgrade", "docktail-terminal")
        .body(Body::empty())
        .map_err(|e| HelperError::Internal(e.to_string()))?
        .into_response())
}

async fn run_session(
    ctid: u32,
    shell: &str,
    cols: u16,
    rows: u16,
    upgraded: hyper::upgrade::Upgraded,
) -> anyhow::Result<()> {
    let io = hyper_util::rt::TokioIo::new(upgraded);
    let (mut sock_reader, mut sock_writer) = tokio::io::split(io);
    let mut session = PtySession::spawn(ctid, shell, cols, rows)?;
    let mut pty_reader = session.try_clone_reader()?;

    // The PTY master's reader is a blocking `std::io::Read`; bridge it onto a
    // channel from a dedicated blocking thread rather than polling it on the
    // async executor.
    let (pty_tx, mut pty_rx) = tokio::sync::mpsc::channel::<Vec<u8>>(64);
    let pty_reader_task = tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 8192];
        loop {
            match pty_reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if pty_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let pty_to_sock = async {
        while let Some(chunk) = pty_rx.recv().await {
            if sock_writer.write_all(&chunk).await.is_err() {
                break;
            }
        }
    };

    let sock_to_pty = async {
        let mut buf = [0u8; 8192];
        let mut pending = Vec::new();
        loop {
            let n = match sock_reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let chunk = &buf[..n];
            if chunk.first() == Some(&b'{') {
                pending.extend_from_slice(chunk);
                if let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    if let Ok(resize) = serde_json::from_slice::<ResizeFrame>(&line) {
                        let _ = session.resize(resize.cols, resize.rows);
                    }
                }
                continue;
            }
            if session.write_all(chunk).is_err() {
                break;
            }
        }
        let _ = session.send_eot();
    };

    tokio::select! {
        _ = pty_to_sock => {}
        _ = sock_to_pty => {}
    }
    pty_reader_task.abort();
    let _ = session.wait();
    Ok(())
}
