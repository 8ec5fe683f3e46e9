//! Adapter between axum requests and pipeline services.
//!
//! [`dispatch`] turns an HTTP request into a [`RequestContext`], runs it
//! through the endpoint's pipeline, and renders the resulting envelope.
//!
//! # Request Decoding
//!
//! - Query string: flat `key=value` pairs (last value wins)
//! - Body: empty, or a JSON object; anything else still runs the pipeline
//!   (logging, rate limiting) but is answered with a 400 instead of reaching
//!   the handler
//! - Request id: `x-request-id` when the client sends a usable one,
//!   otherwise a fresh UUID v4; always echoed on the response

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, Request};
use axum::http::HeaderValue;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use tower::ServiceExt;
use uuid::Uuid;

use crate::error::sanitize_json_error;
use crate::identity::IdentityResolver;
use crate::models::RequestContext;
use crate::pipeline::PipelineService;

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest client-supplied request id that is reused as-is.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Default maximum JSON body size (1 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// A pipeline bound to the way its callers are identified.
#[derive(Clone)]
pub struct Endpoint {
    pipeline: PipelineService,
    resolver: Arc<dyn IdentityResolver>,
    body_limit: usize,
}

impl Endpoint {
    pub fn new(pipeline: PipelineService, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            pipeline,
            resolver,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("resolver", &self.resolver)
            .field("body_limit", &self.body_limit)
            .finish_non_exhaustive()
    }
}

/// Run one HTTP request through `endpoint`.
pub async fn dispatch(endpoint: Endpoint, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let request_id = request_id(&parts);
    let identity = endpoint.resolver.resolve(&parts);
    let ctx = RequestContext::new(parts.method.clone(), parts.uri.path())
        .with_request_id(request_id.clone())
        .with_identity(identity);

    // Undecodable requests still go through the pipeline: they are logged,
    // counted by the rate limiter and rejected in place of the handler.
    let ctx = match decode(&parts, body, endpoint.body_limit).await {
        Ok((query, body)) => ctx.with_query(query).with_body(body),
        Err(reason) => ctx.with_decode_error(reason),
    };
    let Ok(reply) = endpoint.pipeline.oneshot(ctx).await;

    let mut response = reply.into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn request_id(parts: &Parts) -> String {
    parts
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Query parameters and JSON object body, or a client-safe failure reason.
async fn decode(
    parts: &Parts,
    body: Body,
    limit: usize,
) -> Result<(BTreeMap<String, String>, Map<String, Value>), String> {
    let Query(query) = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
        .map_err(|_| "Invalid query string".to_string())?;

    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| "Request body too large or unreadable".to_string())?;

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok((query, Map::new()));
    }

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(body)) => Ok((query, body)),
        Ok(_) => Err("Request body must be a JSON object".to_string()),
        Err(e) => Err(sanitize_json_error(&e)),
    }
}
