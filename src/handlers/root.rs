//! API root and fallback views.

use axum::http::{StatusCode, Uri};
use serde_json::json;
use tracing::warn;

use crate::error::{ErrorKind, HandlerResult};
use crate::models::{ApiReply, RequestContext};

/// Client-facing detail for unknown routes.
pub const NOT_FOUND_DETAIL: &str = "The requested resource was not found on this server.";

/// `GET /api/v1/`: version and the map of available endpoints.
pub async fn api_root(_ctx: RequestContext) -> HandlerResult {
    Ok(ApiReply::ok(
        "Get Fit API v1",
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "root": "/api/v1/",
                "echo": "/api/v1/echo",
                "health": "/health",
            },
        }),
    ))
}

/// Router fallback: a JSON 404 envelope for every unmatched path.
pub async fn not_found(uri: Uri) -> ApiReply {
    warn!(path = %uri.path(), "Route not found");
    ApiReply::failure(
        StatusCode::NOT_FOUND,
        ErrorKind::NotFound.default_message(),
        json!(NOT_FOUND_DETAIL),
    )
}
