//! Composition of decorators around a business handler.
//!
//! A [`Pipeline`] is an ordered list of stages. Declared order is outermost
//! to innermost: the first stage sees the request first and the reply last.
//!
//! ```text
//! Pipeline::new("create_booking")
//!     .log_requests()                       ┐ outermost (after exceptions)
//!     .rate_limit(rate_limit(10, 60)?)      │
//!     .require_fields(["class_id"])         ┘ innermost
//!     .wrap(handler_fn(create_booking));
//! ```
//!
//! [`Pipeline::wrap`] always puts the exception boundary outside every
//! declared stage, so a fault raised by any stage or by the handler is
//! rendered as an envelope. The returned service cannot fail.
//!
//! With rate limiting declared before field validation, an incomplete
//! request still consumes quota; swap the two to validate first.
//!
//! Between the innermost stage and the handler sits a guard that answers
//! undecodable requests with a 400 and turns handler panics into
//! unclassified faults, so every declared stage observes both.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt, service_fn};
use tracing::debug;

use crate::error::{Fault, panic_message};
use crate::middleware::{
    ExceptionService, RateLimitLayer, RequestLogLayer, RequiredFieldsLayer, handle_exceptions,
    log_requests, require_fields,
};
use crate::models::{ApiReply, RequestContext};

/// Type-erased fallible service: a business handler, possibly already
/// wrapped in some stages.
pub type BoxHandler = BoxCloneSyncService<RequestContext, ApiReply, Fault>;

/// The fully assembled, infallible endpoint service.
pub type PipelineService = ExceptionService<BoxHandler>;

/// Adapt an async function into a business handler.
///
/// ```rust
/// use getfit_pipeline::error::HandlerResult;
/// use getfit_pipeline::models::{ApiReply, RequestContext};
/// use getfit_pipeline::pipeline::{Pipeline, handler_fn};
/// use serde_json::json;
///
/// async fn list_classes(_ctx: RequestContext) -> HandlerResult {
///     Ok(ApiReply::ok("Success", json!([])))
/// }
///
/// let service = Pipeline::new("list_classes")
///     .log_requests()
///     .wrap(handler_fn(list_classes));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> BoxHandler
where
    F: Fn(RequestContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<ApiReply, Fault>> + Send + 'static,
{
    BoxCloneSyncService::new(service_fn(f))
}

/// Innermost wrapper around the business handler.
fn guard_handler(handler: BoxHandler) -> BoxHandler {
    BoxCloneSyncService::new(service_fn(move |ctx: RequestContext| {
        let handler = handler.clone();
        async move {
            if let Some(exception) = ctx.decode_failure() {
                return Err(exception.into());
            }

            match AssertUnwindSafe(handler.oneshot(ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(Fault::Unexpected(anyhow::anyhow!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            }
        }
    }))
}

/// One decorator in a pipeline.
#[derive(Debug, Clone)]
pub enum Stage {
    LogRequests(RequestLogLayer),
    RequireFields(RequiredFieldsLayer),
    RateLimit(RateLimitLayer),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::LogRequests(_) => "log_requests",
            Stage::RequireFields(_) => "require_fields",
            Stage::RateLimit(_) => "rate_limit",
        }
    }

    fn apply(&self, inner: BoxHandler) -> BoxHandler {
        match self {
            Stage::LogRequests(layer) => BoxCloneSyncService::new(layer.layer(inner)),
            Stage::RequireFields(layer) => BoxCloneSyncService::new(layer.layer(inner)),
            Stage::RateLimit(layer) => BoxCloneSyncService::new(layer.layer(inner)),
        }
    }
}

impl From<RequestLogLayer> for Stage {
    fn from(layer: RequestLogLayer) -> Self {
        Stage::LogRequests(layer)
    }
}

impl From<RequiredFieldsLayer> for Stage {
    fn from(layer: RequiredFieldsLayer) -> Self {
        Stage::RequireFields(layer)
    }
}

impl From<RateLimitLayer> for Stage {
    fn from(layer: RateLimitLayer) -> Self {
        Stage::RateLimit(layer)
    }
}

/// Ordered stage list for one endpoint.
///
/// Holds no request state; wrapping the same pipeline twice yields two
/// services that share any rate limit stores the stages own.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: Arc<str>,
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Start an empty pipeline for the named handler.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add request logging under this pipeline's handler name.
    pub fn log_requests(self) -> Self {
        let layer = log_requests(self.name.clone());
        self.stage(layer)
    }

    /// Add a preconfigured logging stage, e.g. with custom sensitive fields.
    pub fn log_requests_with(self, layer: RequestLogLayer) -> Self {
        self.stage(layer)
    }

    pub fn require_fields<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stage(require_fields(fields))
    }

    pub fn rate_limit(self, layer: RateLimitLayer) -> Self {
        self.stage(layer)
    }

    /// Append a stage inside all previously declared ones.
    pub fn stage(mut self, stage: impl Into<Stage>) -> Self {
        self.stages.push(stage.into());
        self
    }

    /// Stages in declared order, outermost first.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Wrap `handler` in every stage, then in the exception boundary.
    pub fn wrap<S>(&self, handler: S) -> PipelineService
    where
        S: Service<RequestContext, Response = ApiReply, Error = Fault>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let inner = self
            .stages
            .iter()
            .rev()
            .fold(guard_handler(BoxCloneSyncService::new(handler)), |svc, stage| {
                stage.apply(svc)
            });

        debug!(
            handler = %self.name,
            stages = ?self.stages.iter().map(Stage::name).collect::<Vec<_>>(),
            "Pipeline assembled"
        );

        handle_exceptions().layer(inner)
    }
}
