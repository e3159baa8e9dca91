//! Route table and cross-cutting middleware for the helper daemon (spec §6.2).

pub mod conf_append;
pub mod fs_ops;
pub mod health;
pub mod pct_exec;
pub mod pct_push;
pub mod pct_set;
pub mod terminal;
pub mod update;

use std::time::Instant;

use axum::body::Body;
use axum::extract::{Extension, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::peer::PeerCred;
use crate::state::SharedHelperState;

pub fn build_router(state: SharedHelperState) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/v1/pct/exec", post(pct_exec::exec))
        .route("/v1/pct/exec-stream", post(pct_exec::exec_stream))
        .route("/v1/pct/push", post(pct_push::push))
        .route("/v1/pct/set", post(pct_set::set))
        .route("/v1/conf/append", post(conf_append::append))
        .route("/v1/fs/mkdir", post(fs_ops::mkdir))
        .route("/v1/fs/chown", post(fs_ops::chown))
        .route("/v1/fs/rm", post(fs_ops::rm))
        .route("/v1/update", post(update::update))
        .route("/v1/terminal", get(terminal::terminal))
        .layer(middleware::from_fn_with_state(state.clone(), audit_layer))
        .layer(middleware::from_fn(auth_layer))
        .layer(RequestBodyLimitLayer::new(body_limit))
        // health is deliberately outside the auth layer (spec §4.3: the one
        // endpoint reachable by any peer uid), so it is routed separately
        // and merged in rather than nested under the layered router above.
        .route("/v1/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Rejects any connection whose peer credentials (attached by the server's
/// accept loop as an `Extension<PeerCred>`) aren't root or the configured
/// service user. `/v1/health` is mounted outside this layer and never hits
/// this middleware.
async fn auth_layer(
    Extension(peer): Extension<PeerCred>,
    State(state): State<SharedHelperState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !peer.is_authorized(state.config.service_uid) {
        tracing::warn!(uid = peer.uid, pid = peer.pid, "rejected unauthorized peer");
        return (StatusCode::FORBIDDEN, "unauthorized peer").into_response();
    }
    next.run(req).await
}

/// Records one audit-log line per request: peer identity, endpoint, elapsed
/// time, and whether the response was a success (spec §4.3, §6.3).
async fn audit_layer(
    Extension(peer): Extension<PeerCred>,
    State(state): State<SharedHelperState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let ctid = req
        .uri()
        .query()
        .and_then(|q| {
            q.split('&')
                .find_map(|kv| kv.strip_prefix("ctid="))
                .and_then(|v| v.parse::<u32>().ok())
        });
    let start = Instant::now();

    let response = next.run(req).await;

    let ok = response.status().is_success();
    state.audit.record(
        peer.uid,
        peer.pid,
        &path,
        ctid,
        start.elapsed().as_millis(),
        ok,
    );
    response
}
