//! Exception boundary: the outermost pipeline layer.
//!
//! Every fault raised anywhere inside the chain ends here and is rendered
//! into an error envelope. Successful replies pass through untouched.
//!
//! | Fault                                  | Status        | Log level |
//! |----------------------------------------|---------------|-----------|
//! | `ApiException` (4xx kinds)             | kind's status | `warn`    |
//! | `ApiException` (`InternalServerError`) | 500           | `error`   |
//! | `Fault::Unexpected`                    | 500           | `error`   |
//!
//! 5xx responses always carry the fixed generic message; the real cause is
//! only written to the server log.

use std::convert::Infallible;
use std::task::{Context, Poll};

use axum::http::{HeaderValue, Method};
use tower::{Layer, Service, ServiceExt};
use tracing::{error, warn};

use super::LayerFuture;
use crate::error::{ApiException, ErrorDetail, ErrorKind, Fault};
use crate::metrics;
use crate::models::{ApiReply, Identity, RequestContext};

/// Build the exception handling decorator.
pub fn handle_exceptions() -> ExceptionLayer {
    ExceptionLayer
}

/// Request details kept for fault logging after the context has moved inward.
#[derive(Debug, Clone)]
pub struct FaultScope {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub identity: Identity,
}

impl From<&RequestContext> for FaultScope {
    fn from(ctx: &RequestContext) -> Self {
        Self {
            request_id: ctx.request_id.clone(),
            method: ctx.method.clone(),
            path: ctx.path.clone(),
            identity: ctx.identity.clone(),
        }
    }
}

/// Translate a fault into the reply the client sees, logging it on the way.
pub fn render_fault(fault: Fault, scope: &FaultScope) -> ApiReply {
    metrics::record_fault(fault.kind());

    match fault {
        Fault::Api(exception) if !exception.kind().is_server_error() => {
            warn!(
                request_id = %scope.request_id,
                identity = %scope.identity,
                method = %scope.method,
                path = %scope.path,
                kind = %exception.kind(),
                detail = %exception.detail(),
                "API exception"
            );
            render_exception(&exception)
        }
        Fault::Api(exception) => {
            error!(
                request_id = %scope.request_id,
                identity = %scope.identity,
                method = %scope.method,
                path = %scope.path,
                detail = %exception.detail(),
                cause = ?exception.cause(),
                "Internal server error"
            );
            render_exception(&exception)
        }
        Fault::Unexpected(err) => {
            error!(
                request_id = %scope.request_id,
                identity = %scope.identity,
                method = %scope.method,
                path = %scope.path,
                error = ?err,
                "Unexpected exception"
            );
            render_exception(&ApiException::new(ErrorKind::InternalServerError))
        }
    }
}

fn render_exception(exception: &ApiException) -> ApiReply {
    let detail: ErrorDetail = exception.client_detail();
    let mut reply = ApiReply::failure(exception.status(), exception.message(), detail.to_value());

    if let Some(hint) = exception.retry_hint() {
        let retry_after = hint.retry_after.as_secs().max(1);
        reply
            .headers
            .insert("retry-after", HeaderValue::from(retry_after));
        reply
            .headers
            .insert("x-ratelimit-limit", HeaderValue::from(hint.limit));
        reply
            .headers
            .insert("x-ratelimit-remaining", HeaderValue::from(0u32));
    }

    reply
}

/// Layer producing [`ExceptionService`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionLayer;

impl<S> Layer<S> for ExceptionLayer {
    type Service = ExceptionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ExceptionService { inner }
    }
}

/// Infallible service: faults from `inner` become error replies.
#[derive(Debug, Clone)]
pub struct ExceptionService<S> {
    inner: S,
}

impl<S> Service<RequestContext> for ExceptionService<S>
where
    S: Service<RequestContext, Response = ApiReply, Error = Fault> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ApiReply;
    type Error = Infallible;
    type Future = LayerFuture<Result<ApiReply, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Inner readiness is driven inside the call so its errors are rendered too.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: RequestContext) -> Self::Future {
        let inner = self.inner.clone();
        let scope = FaultScope::from(&ctx);

        Box::pin(async move {
            match inner.oneshot(ctx).await {
                Ok(reply) => Ok(reply),
                Err(fault) => Ok(render_fault(fault, &scope)),
            }
        })
    }
}
