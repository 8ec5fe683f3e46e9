//! Health endpoint.
//!
//! - `GET /health` - Liveness with uptime and rate limit store size
//!
//! Served directly by axum, outside any pipeline, so probes are never rate
//! limited or logged per request.

use axum::extract::State;
use chrono::Utc;
use serde_json::json;
use tracing::instrument;

use crate::models::ApiReply;
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK.
///
/// # Response Body
///
/// ```json
/// {
///   "message": "Service is healthy",
///   "data": {
///     "status": "healthy",
///     "version": "0.1.0",
///     "uptime_seconds": 42,
///     "rate_limit_tracked_keys": 3,
///     "timestamp": "2024-01-15T10:30:00Z"
///   },
///   "error": null
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> ApiReply {
    ApiReply::ok(
        "Service is healthy",
        json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": state.uptime_seconds(),
            "rate_limit_tracked_keys": state.rate_limit_store.len(),
            "timestamp": Utc::now().to_rfc3339(),
        }),
    )
}
