//! Request/response logging decorator.
//!
//! Emits exactly two records per request:
//!
//! - `API request` before calling inward: method, path, identity, and the
//!   sanitized parameters
//! - `API response` after the inner chain finishes, on success and failure
//!   alike, with the status the client will receive
//!
//! Faults are passed outward unchanged; classifying them is the exception
//! boundary's job.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use serde_json::Value;
use tower::{Layer, Service};
use tracing::info;

use super::LayerFuture;
use crate::error::Fault;
use crate::metrics;
use crate::models::{ApiReply, RequestContext};
use crate::validation::SensitiveFields;

/// Build the logging decorator for the named handler.
pub fn log_requests(handler: impl Into<Arc<str>>) -> RequestLogLayer {
    RequestLogLayer::new(handler)
}

/// Layer producing [`RequestLogService`].
#[derive(Debug, Clone)]
pub struct RequestLogLayer {
    handler: Arc<str>,
    sensitive: Arc<SensitiveFields>,
}

impl RequestLogLayer {
    pub fn new(handler: impl Into<Arc<str>>) -> Self {
        Self {
            handler: handler.into(),
            sensitive: Arc::new(SensitiveFields::default()),
        }
    }

    /// Replace the default list of redacted parameter names.
    pub fn with_sensitive_fields(mut self, sensitive: SensitiveFields) -> Self {
        self.sensitive = Arc::new(sensitive);
        self
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogService {
            inner,
            handler: self.handler.clone(),
            sensitive: self.sensitive.clone(),
        }
    }
}

/// Logging service wrapper.
#[derive(Debug, Clone)]
pub struct RequestLogService<S> {
    inner: S,
    handler: Arc<str>,
    sensitive: Arc<SensitiveFields>,
}

impl<S> RequestLogService<S> {
    /// Query parameters, plus the body for mutating methods, with secrets redacted.
    fn sanitized_params(&self, ctx: &RequestContext) -> Value {
        let mut params = self.sensitive.sanitize(&ctx.payload());
        if ctx.is_mutating() && !ctx.query.is_empty() {
            let query = ctx
                .query
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            params.insert("query".to_string(), Value::Object(self.sensitive.sanitize(&query)));
        }
        Value::Object(params)
    }
}

impl<S> Service<RequestContext> for RequestLogService<S>
where
    S: Service<RequestContext, Response = ApiReply, Error = Fault> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ApiReply;
    type Error = Fault;
    type Future = LayerFuture<Result<ApiReply, Fault>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, ctx: RequestContext) -> Self::Future {
        // Take the service that was driven to readiness, leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let handler = self.handler.clone();

        let params = self.sanitized_params(&ctx);
        let request_id = ctx.request_id.clone();
        let method = ctx.method.clone();
        let path = ctx.path.clone();

        info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            identity = %ctx.identity,
            handler = %handler,
            params = %params,
            "API request"
        );

        Box::pin(async move {
            let started = Instant::now();
            let result = inner.call(ctx).await;
            let elapsed = started.elapsed();

            let (status, outcome) = match &result {
                Ok(reply) => (reply.status, "ok"),
                Err(fault) => (fault.status(), "error"),
            };

            info!(
                request_id = %request_id,
                method = %method,
                path = %path,
                handler = %handler,
                status = status.as_u16(),
                outcome,
                elapsed_ms = elapsed.as_millis() as u64,
                "API response"
            );
            metrics::record_request(&handler, status.as_u16(), elapsed.as_secs_f64());

            result
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ApiException;
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::{ServiceExt, service_fn};

    #[tokio::test]
    async fn test_success_is_returned_unchanged() {
        let svc = log_requests("classes").layer(service_fn(|_ctx: RequestContext| async {
            Ok::<_, Fault>(ApiReply::ok("Success", json!([1, 2])))
        }));

        let reply = svc
            .oneshot(RequestContext::new(Method::GET, "/classes"))
            .await
            .unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.envelope.data, Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_fault_is_reraised_unchanged() {
        let svc = log_requests("bookings").layer(service_fn(|_ctx: RequestContext| async {
            Err::<ApiReply, _>(Fault::from(ApiException::not_found("Booking not found")))
        }));

        let fault = svc
            .oneshot(RequestContext::new(Method::GET, "/bookings/1"))
            .await
            .unwrap_err();
        match fault {
            Fault::Api(e) => assert_eq!(e.detail().to_string(), "Booking not found"),
            Fault::Unexpected(e) => panic!("unexpected fault: {e}"),
        }
    }

    #[test]
    fn test_sanitized_params_redacts_body_and_query() {
        let svc = log_requests("login").layer(());
        let body = json!({"email": "a@b.com", "password": "hunter2"})
            .as_object()
            .cloned()
            .unwrap();
        let ctx = RequestContext::new(Method::POST, "/login")
            .with_body(body)
            .with_query([("token", "abc")]);

        let params = svc.sanitized_params(&ctx);
        assert_eq!(params["email"], json!("a@b.com"));
        assert_eq!(params["password"], json!("[REDACTED]"));
        assert_eq!(params["query"]["token"], json!("[REDACTED]"));
    }
}
