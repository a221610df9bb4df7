//! HTTP request handlers.

pub mod health;
pub mod instances;
pub mod lookup;

pub use health::*;
pub use instances::*;
pub use lookup::*;

use axum::Json;
use axum::http::StatusCode;
use serde_json::{Value, json};

/// Fallback for unknown routes.
pub async fn route_not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"message": "invalid request - route not found"})),
    )
}
