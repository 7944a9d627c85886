//! Liveness probe.

use axum::Json;
use serde_json::{Value, json};

/// GET /health — liveness for load balancers and deploy checks. Does not
/// touch the store; database trouble surfaces through the stock and
/// order routes instead.
pub async fn check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "inventory-api",
    }))
}
