use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiException, Fault};

/// Uniform JSON wrapper returned by every endpoint.
///
/// All three keys are always serialized; absent values are `null`.
///
/// ```json
/// { "message": "Success", "data": { "id": 1 }, "error": null }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Short human-readable summary
    pub message: String,
    /// Handler payload on success, `null` on failure
    pub data: Option<Value>,
    /// Diagnostic detail on failure, `null` on success
    pub error: Option<Value>,
}

impl Envelope {
    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, error: Value) -> Self {
        Self {
            message: message.into(),
            data: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// An envelope paired with its HTTP status and any extra response headers.
///
/// Business handlers return this on success; the exception boundary
/// produces it for failures.
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: StatusCode,
    pub envelope: Envelope,
    pub headers: HeaderMap,
}

impl ApiReply {
    pub fn new(status: StatusCode, envelope: Envelope) -> Self {
        Self {
            status,
            envelope,
            headers: HeaderMap::new(),
        }
    }

    /// 200 with `data` as the payload.
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self::new(StatusCode::OK, Envelope::success(message, data))
    }

    /// 201 with `data` as the payload.
    pub fn created(message: impl Into<String>, data: Value) -> Self {
        Self::new(StatusCode::CREATED, Envelope::success(message, data))
    }

    /// Serialize `data` into a success envelope with the given status.
    ///
    /// # Errors
    ///
    /// Serialization failures are unclassified faults (500).
    pub fn json<T: Serialize>(
        status: StatusCode,
        message: impl Into<String>,
        data: &T,
    ) -> Result<Self, Fault> {
        let value = serde_json::to_value(data).map_err(ApiException::internal)?;
        Ok(Self::new(status, Envelope::success(message, value)))
    }

    pub fn failure(status: StatusCode, message: impl Into<String>, error: Value) -> Self {
        Self::new(status, Envelope::failure(message, error))
    }
}

impl IntoResponse for ApiReply {
    fn into_response(self) -> Response {
        (self.status, self.headers, Json(self.envelope)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = Envelope::success("Success", json!({"id": 7}));
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(
            json,
            json!({"message": "Success", "data": {"id": 7}, "error": null})
        );
    }

    #[test]
    fn test_failure_envelope_serialization() {
        let envelope = Envelope::failure("Validation error", json!(["password"]));
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(
            json,
            json!({"message": "Validation error", "data": null, "error": ["password"]})
        );
        assert!(!envelope.is_success());
    }

    #[test]
    fn test_reply_constructors() {
        assert_eq!(ApiReply::ok("ok", json!(1)).status, StatusCode::OK);
        assert_eq!(ApiReply::created("ok", json!(1)).status, StatusCode::CREATED);
    }

    #[test]
    fn test_reply_json_serializes_payload() {
        #[derive(Serialize)]
        struct Booking {
            id: u32,
        }

        let reply = ApiReply::json(StatusCode::CREATED, "Booked", &Booking { id: 3 }).unwrap();
        assert_eq!(reply.envelope.data, Some(json!({"id": 3})));
    }

    #[tokio::test]
    async fn test_reply_into_response() {
        let response = ApiReply::ok("Success", json!({"a": 1})).into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let envelope: Envelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.data, Some(json!({"a": 1})));
        assert_eq!(envelope.error, None);
    }
}
