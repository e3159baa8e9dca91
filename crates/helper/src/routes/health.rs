use axum::Json;
use serde_json::{json, Value};

/// `GET /v1/health` — the one endpoint reachable by any peer uid.
pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
