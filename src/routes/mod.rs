mod chat;
mod health;
mod models;
mod usage;

pub use chat::chat_completions;
pub use health::{health, liveness, metrics, readiness};
pub use models::list_models;
pub use usage::usage_report;

use axum::{Json, http::StatusCode, response::IntoResponse};

use crate::error::ErrorEnvelope;

/// Fallback for unknown paths: same envelope as every other error.
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorEnvelope::new(StatusCode::NOT_FOUND, "not found")),
    )
}
