use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use axum::http::Method;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ApiException;

/// Who is making the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Authenticated user, identified by user id.
    User(String),
    /// Unauthenticated caller, identified by client address.
    Anonymous { client: String },
}

impl Identity {
    pub fn anonymous(client: impl Into<String>) -> Self {
        Identity::Anonymous {
            client: client.into(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::User(_))
    }

    /// Bucket key for rate limiting.
    ///
    /// Prefixed so a user id can never collide with a client address.
    pub fn rate_limit_key(&self) -> String {
        match self {
            Identity::User(id) => format!("user:{id}"),
            Identity::Anonymous { client } => format!("client:{client}"),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::User(id) => write!(f, "user {id}"),
            Identity::Anonymous { client } => write!(f, "anonymous ({client})"),
        }
    }
}

/// Everything the pipeline layers and business handler know about a request.
///
/// Moved through the chain by value; layers only read it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id, echoed in the `x-request-id` response header
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub identity: Identity,
    /// Decoded query-string parameters
    pub query: BTreeMap<String, String>,
    /// Decoded JSON body (empty for bodiless requests)
    pub body: Map<String, Value>,
    /// Client-safe reason the query or body could not be decoded.
    ///
    /// Such requests still travel the whole pipeline, so they are logged and
    /// counted; the handler is never reached.
    pub decode_error: Option<String>,
}

impl RequestContext {
    /// Create a context for an anonymous caller with a fresh request id.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method,
            path: path.into(),
            identity: Identity::anonymous(crate::middleware::ip::UNKNOWN_IP),
            query: BTreeMap::new(),
            body: Map::new(),
            decode_error: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_query<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_decode_error(mut self, reason: impl Into<String>) -> Self {
        self.decode_error = Some(reason.into());
        self
    }

    /// The bad request raised in place of the handler when decoding failed.
    pub fn decode_failure(&self) -> Option<ApiException> {
        self.decode_error.as_deref().map(ApiException::bad_request)
    }

    /// Whether the method carries its payload in the body.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    /// The payload checked by field validation: body for mutating methods,
    /// query parameters otherwise.
    pub fn payload(&self) -> Cow<'_, Map<String, Value>> {
        if self.is_mutating() {
            Cow::Borrowed(&self.body)
        } else {
            Cow::Owned(
                self.query
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            )
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rate_limit_key_prefixes() {
        assert_eq!(Identity::User("42".into()).rate_limit_key(), "user:42");
        assert_eq!(
            Identity::anonymous("10.0.0.1").rate_limit_key(),
            "client:10.0.0.1"
        );
    }

    #[test]
    fn test_payload_uses_body_for_post() {
        let mut body = Map::new();
        body.insert("email".into(), json!("a@b.com"));
        let ctx = RequestContext::new(Method::POST, "/login")
            .with_query([("email", "ignored")])
            .with_body(body);

        assert_eq!(ctx.payload().get("email"), Some(&json!("a@b.com")));
        assert!(matches!(ctx.payload(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_payload_uses_query_for_get() {
        let ctx = RequestContext::new(Method::GET, "/classes").with_query([("q", "yoga")]);

        assert_eq!(ctx.payload().get("q"), Some(&json!("yoga")));
    }

    #[test]
    fn test_decode_failure_is_bad_request() {
        let ctx = RequestContext::new(Method::POST, "/login");
        assert!(ctx.decode_failure().is_none());

        let ctx = ctx.with_decode_error("Malformed JSON in request body");
        let exception = ctx.decode_failure().unwrap();
        assert_eq!(exception.kind(), crate::error::ErrorKind::BadRequest);
        assert_eq!(
            exception.client_detail().to_value(),
            json!("Malformed JSON in request body")
        );
    }

    #[test]
    fn test_new_context_is_anonymous() {
        let ctx = RequestContext::new(Method::GET, "/");
        assert!(!ctx.identity.is_authenticated());
        assert!(Uuid::parse_str(&ctx.request_id).is_ok());
    }
}
