//! Request handlers, one module per resource.

pub mod base_models;
pub mod models;
pub mod training;

use axum::Json;
use serde_json::{json, Value};

/// Liveness check.
pub async fn handle_health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
