//! Required-field validation decorator.

use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::warn;

use super::LayerFuture;
use crate::error::{ApiException, Fault};
use crate::models::{ApiReply, RequestContext};
use crate::validation::missing_fields;

/// Build a decorator rejecting requests whose payload lacks any of `fields`.
///
/// The payload is the JSON body for POST/PUT/PATCH/DELETE and the query
/// string otherwise. All missing fields are reported together, in the order
/// given here.
pub fn require_fields<I, S>(fields: I) -> RequiredFieldsLayer
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    RequiredFieldsLayer {
        fields: fields.into_iter().map(Into::into).collect(),
    }
}

/// Layer producing [`RequiredFieldsService`].
#[derive(Debug, Clone)]
pub struct RequiredFieldsLayer {
    fields: Arc<[String]>,
}

impl RequiredFieldsLayer {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl<S> Layer<S> for RequiredFieldsLayer {
    type Service = RequiredFieldsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequiredFieldsService {
            inner,
            fields: self.fields.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequiredFieldsService<S> {
    inner: S,
    fields: Arc<[String]>,
}

impl<S> Service<RequestContext> for RequiredFieldsService<S>
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
        // An undecodable payload has no fields to check; the pipeline's
        // innermost guard rejects it.
        let missing = if ctx.decode_error.is_some() {
            Vec::new()
        } else {
            missing_fields(&ctx.payload(), &*self.fields)
        };
        if !missing.is_empty() {
            warn!(
                request_id = %ctx.request_id,
                path = %ctx.path,
                missing = ?missing,
                "Missing required fields"
            );
            return Box::pin(async move { Err(ApiException::validation(missing).into()) });
        }

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(ctx).await })
    }
}
