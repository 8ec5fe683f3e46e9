//! Exception taxonomy shared by business handlers and the pipeline layers.
//!
//! Business code fails with a [`Fault`]: either a classified [`ApiException`]
//! (one of the fixed [`ErrorKind`]s) or an unclassified `anyhow::Error`.
//! The exception boundary in [`crate::middleware::exceptions`] is the only
//! place where faults are turned into HTTP responses.
//!
//! # Status Mapping
//!
//! | Kind                  | Status | Client message          |
//! |-----------------------|--------|-------------------------|
//! | `BadRequest`          | 400    | "Bad request"           |
//! | `Unauthorized`        | 401    | "Unauthorized"          |
//! | `Forbidden`           | 403    | "Permission denied"     |
//! | `NotFound`            | 404    | "Resource not found"    |
//! | `ValidationError`     | 400    | "Validation error"      |
//! | `RateLimitExceeded`   | 429    | "Too many requests"     |
//! | `InternalServerError` | 500    | "Internal server error" |
//!
//! Server errors never expose their detail or cause to clients; see
//! [`ApiException::client_detail`].

use std::any::Any;
use std::fmt;
use std::time::Duration;

use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Fixed client-facing detail for every 5xx response.
pub const GENERIC_SERVER_ERROR: &str = "An unexpected error occurred. Please try again later.";

/// The closed set of classified failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    ValidationError,
    RateLimitExceeded,
    InternalServerError,
}

impl ErrorKind {
    /// HTTP status implied by this kind.
    pub const fn status(self) -> StatusCode {
        match self {
            ErrorKind::BadRequest | ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code, used in logs and metric labels.
    pub const fn code(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::InternalServerError => "internal_server_error",
        }
    }

    /// Envelope `message` used when the exception does not override it.
    pub const fn default_message(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "Bad request",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Forbidden => "Permission denied",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::ValidationError => "Validation error",
            ErrorKind::RateLimitExceeded => "Too many requests",
            ErrorKind::InternalServerError => "Internal server error",
        }
    }

    /// Envelope `error` used when the exception carries no detail of its own.
    pub fn default_detail(self) -> ErrorDetail {
        match self {
            ErrorKind::BadRequest => ErrorDetail::from("Bad request."),
            ErrorKind::Unauthorized => ErrorDetail::from("Unauthorized."),
            ErrorKind::Forbidden => {
                ErrorDetail::from("You don't have permission to access this resource.")
            }
            ErrorKind::NotFound => ErrorDetail::from("Resource not found."),
            ErrorKind::ValidationError => ErrorDetail::Fields(Vec::new()),
            ErrorKind::RateLimitExceeded => {
                ErrorDetail::from("Rate limit exceeded. Please retry later.")
            }
            ErrorKind::InternalServerError => ErrorDetail::from(GENERIC_SERVER_ERROR),
        }
    }

    pub const fn is_server_error(self) -> bool {
        matches!(self, ErrorKind::InternalServerError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Diagnostic payload rendered into the envelope's `error` slot.
///
/// Serialized untagged: a plain string, a list of field names, or any JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Message(String),
    /// Names of missing or invalid fields, in declared order.
    Fields(Vec<String>),
    /// Arbitrary structured detail, e.g. per-field error maps.
    Structured(Value),
}

impl ErrorDetail {
    pub fn to_value(&self) -> Value {
        match self {
            ErrorDetail::Message(msg) => Value::String(msg.clone()),
            ErrorDetail::Fields(fields) => {
                Value::Array(fields.iter().cloned().map(Value::String).collect())
            }
            ErrorDetail::Structured(value) => value.clone(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetail::Message(msg) => f.write_str(msg),
            ErrorDetail::Fields(fields) => f.write_str(&fields.join(", ")),
            ErrorDetail::Structured(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for ErrorDetail {
    fn from(msg: &str) -> Self {
        ErrorDetail::Message(msg.to_string())
    }
}

impl From<String> for ErrorDetail {
    fn from(msg: String) -> Self {
        ErrorDetail::Message(msg)
    }
}

impl From<Vec<String>> for ErrorDetail {
    fn from(fields: Vec<String>) -> Self {
        ErrorDetail::Fields(fields)
    }
}

impl From<Value> for ErrorDetail {
    fn from(value: Value) -> Self {
        ErrorDetail::Structured(value)
    }
}

/// Quota information attached to `RateLimitExceeded` for response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryHint {
    /// Configured maximum requests per window.
    pub limit: u32,
    /// Time until the current window closes.
    pub retry_after: Duration,
}

/// A classified failure raised by business code or a pipeline layer.
///
/// Immutable once built: the `with_*` methods consume and return `self`.
///
/// # Example
///
/// ```rust
/// use getfit_pipeline::error::{ApiException, ErrorKind};
///
/// let err = ApiException::not_found("Booking not found");
/// assert_eq!(err.kind(), ErrorKind::NotFound);
/// assert_eq!(err.status().as_u16(), 404);
/// ```
#[derive(Debug)]
pub struct ApiException {
    kind: ErrorKind,
    message: Option<String>,
    detail: ErrorDetail,
    cause: Option<anyhow::Error>,
    retry: Option<RetryHint>,
}

impl ApiException {
    /// Create an exception of `kind` with its default detail.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            detail: kind.default_detail(),
            cause: None,
            retry: None,
        }
    }

    pub fn bad_request(detail: impl Into<ErrorDetail>) -> Self {
        Self::new(ErrorKind::BadRequest).with_detail(detail)
    }

    pub fn unauthorized(detail: impl Into<ErrorDetail>) -> Self {
        Self::new(ErrorKind::Unauthorized).with_detail(detail)
    }

    pub fn forbidden(detail: impl Into<ErrorDetail>) -> Self {
        Self::new(ErrorKind::Forbidden).with_detail(detail)
    }

    pub fn not_found(detail: impl Into<ErrorDetail>) -> Self {
        Self::new(ErrorKind::NotFound).with_detail(detail)
    }

    /// Validation failure listing every missing field.
    pub fn validation(fields: Vec<String>) -> Self {
        Self::new(ErrorKind::ValidationError).with_detail(ErrorDetail::Fields(fields))
    }

    pub fn rate_limited(limit: u32, retry_after: Duration) -> Self {
        let mut err = Self::new(ErrorKind::RateLimitExceeded);
        err.retry = Some(RetryHint { limit, retry_after });
        err
    }

    /// Server-side failure; `cause` is logged but never rendered.
    pub fn internal(cause: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorKind::InternalServerError).with_cause(cause)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<ErrorDetail>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// Envelope message: the override, or the kind's default.
    ///
    /// Server errors always use the default.
    pub fn message(&self) -> &str {
        match &self.message {
            Some(message) if !self.kind.is_server_error() => message,
            _ => self.kind.default_message(),
        }
    }

    /// The detail as constructed (server-side view).
    pub fn detail(&self) -> &ErrorDetail {
        &self.detail
    }

    /// The detail safe to send to the client.
    pub fn client_detail(&self) -> ErrorDetail {
        if self.kind.is_server_error() {
            ErrorDetail::from(GENERIC_SERVER_ERROR)
        } else {
            self.detail.clone()
        }
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }

    pub fn retry_hint(&self) -> Option<RetryHint> {
        self.retry
    }
}

impl From<ErrorKind> for ApiException {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for ApiException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for ApiException {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| -> &(dyn std::error::Error + 'static) { cause.as_ref() })
    }
}

/// Everything a pipeline layer or business handler can fail with.
#[derive(Error, Debug)]
pub enum Fault {
    /// A classified exception; rendered with its kind's status.
    #[error(transparent)]
    Api(#[from] ApiException),

    /// Anything unclassified; always rendered as a generic 500.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl Fault {
    /// The kind this fault renders as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Fault::Api(e) => e.kind(),
            Fault::Unexpected(_) => ErrorKind::InternalServerError,
        }
    }

    /// The status the exception boundary will respond with.
    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }
}

impl From<ErrorKind> for Fault {
    fn from(kind: ErrorKind) -> Self {
        Fault::Api(ApiException::new(kind))
    }
}

/// Convenience alias for business handlers and layers.
pub type HandlerResult<T = crate::models::ApiReply> = Result<T, Fault>;

/// Sanitize serde error messages to avoid leaking internal type information.
///
/// Used when a request body cannot be decoded into the JSON payload map.
pub fn sanitize_json_error(e: &serde_json::Error) -> String {
    let msg = e.to_string();

    if msg.contains("invalid type") {
        return "Request body must be a JSON object".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Text of a caught panic payload, for server-side logs only.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic payload"
    }
}
