//! # Get Fit API Request Pipeline
//!
//! Composable request handling for the Get Fit HTTP API, built on tower
//! layers and served with Axum:
//!
//! - **Envelope**: every response is `{"message", "data", "error"}`
//! - **Exception taxonomy**: classified faults mapped to HTTP statuses, with
//!   a boundary that never leaks internal details on 5xx
//! - **Request logging**: one start and one completion record per request,
//!   with secrets redacted
//! - **Field validation**: all missing required fields reported at once
//! - **Rate limiting**: fixed window per user or client address
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  HTTP layers (Catch Panic → Trace → CORS → Body Limit)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  http::dispatch (context, identity, request id)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline (Exceptions → declared stages → Handler)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RateLimitStore (DashMap, per-key atomic check)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use getfit_pipeline::error::{ApiException, HandlerResult};
//! use getfit_pipeline::middleware::rate_limit;
//! use getfit_pipeline::models::{ApiReply, RequestContext};
//! use getfit_pipeline::pipeline::{Pipeline, handler_fn};
//! use serde_json::json;
//!
//! async fn create_booking(ctx: RequestContext) -> HandlerResult {
//!     if ctx.body.get("class_id").and_then(|v| v.as_u64()) == Some(0) {
//!         return Err(ApiException::not_found("Class not found").into());
//!     }
//!     Ok(ApiReply::created("Booking created", json!({"status": "confirmed"})))
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = Pipeline::new("create_booking")
//!     .log_requests()
//!     .rate_limit(rate_limit(10, 3600)?)
//!     .require_fields(["class_id"])
//!     .wrap(handler_fn(create_booking));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod identity;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{ApiException, ErrorKind, Fault, HandlerResult};
pub use models::{ApiReply, Envelope, Identity, RequestContext};
pub use pipeline::{Pipeline, handler_fn};
pub use routes::build_router;
pub use state::AppState;
