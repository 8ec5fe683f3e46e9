//! Application routing configuration with middleware stack.
//!
//! # HTTP Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Catch Panic    │ ← generic 500 envelope
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP spans
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    Body Limit    │
//! └────────┬─────────┘
//!          ▼
//!   Route → Endpoint pipeline (exceptions → logging → ... → handler)
//! ```
//!
//! # Routes
//!
//! - `GET /health` - Liveness (plain axum handler)
//! - `GET /api/v1/` - API root (logged pipeline)
//! - `POST /api/v1/echo` - Demo endpoint (logging, rate limit, required fields)
//! - anything else - JSON 404 envelope

use std::any::Any;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{ErrorKind, GENERIC_SERVER_ERROR, panic_message};
use crate::handlers;
use crate::http::{Endpoint, dispatch};
use crate::limiter::RateLimitError;
use crate::models::ApiReply;
use crate::pipeline::{Pipeline, handler_fn};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Errors
///
/// Returns `RateLimitError` if the configured quota is invalid.
pub fn build_router(state: AppState) -> Result<Router, RateLimitError> {
    let config = state.config.clone();

    // =========================================================================
    // Endpoint Pipelines
    // =========================================================================
    let api_root = state.endpoint(
        Pipeline::new("api_root")
            .log_requests_with(state.log_layer("api_root"))
            .wrap(handler_fn(handlers::api_root)),
    );

    let echo = state.endpoint(
        Pipeline::new("echo")
            .log_requests_with(state.log_layer("echo"))
            .rate_limit(state.rate_limit_layer()?)
            .require_fields(["message"])
            .wrap(handler_fn(handlers::echo)),
    );

    info!(
        max_requests = config.rate_limit_max_requests,
        window_secs = config.rate_limit_window.as_secs(),
        trusted_proxies = config.trusted_proxies.len(),
        "Rate limiting enabled"
    );

    // =========================================================================
    // Build Router with Routes
    // =========================================================================
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1", get(serve(api_root.clone())))
        .route("/api/v1/", get(serve(api_root)))
        .route("/api/v1/echo", post(serve(echo)))
        .fallback(handlers::not_found);

    // =========================================================================
    // Apply Middleware Stack (order matters - applied bottom to top)
    // =========================================================================
    info!(
        max_size_kb = config.max_request_body_size / 1024,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));
    router = router.layer(build_cors_layer(&config.cors_allowed_origins));
    router = router.layer(TraceLayer::new_for_http());
    router = router.layer(CatchPanicLayer::custom(panic_response));

    Ok(router.with_state(state))
}

/// Axum handler running requests through `endpoint`.
fn serve(
    endpoint: Endpoint,
) -> impl Fn(Request) -> std::pin::Pin<Box<dyn Future<Output = Response> + Send>> + Clone + Send + Sync + 'static
{
    move |request: Request| Box::pin(dispatch(endpoint.clone(), request))
}

/// Render a caught panic as the generic 500 envelope.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    error!(panic = %panic_message(panic.as_ref()), "Panic outside the request pipeline");

    ApiReply::failure(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::InternalServerError.default_message(),
        json!(GENERIC_SERVER_ERROR),
    )
    .into_response()
}

/// Build CORS layer from configuration.
///
/// # Security Note
///
/// Using `*` (any origin) is convenient for development but should be
/// avoided in production. Specify explicit origins instead.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(AnyOrigin)
            .allow_methods(AnyOrigin)
            .allow_headers(AnyOrigin)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(AnyOrigin)
            .allow_headers(AnyOrigin)
    }
}
