//! Pipeline behavior driven directly through tower services.
//!
//! Run with: `cargo test --test pipeline_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{Method, StatusCode};
use getfit_pipeline::error::GENERIC_SERVER_ERROR;
use getfit_pipeline::limiter::{ManualClock, RateLimitStore};
use getfit_pipeline::middleware::{RateLimitLayer, rate_limit};
use getfit_pipeline::pipeline::{BoxHandler, Pipeline, PipelineService, handler_fn};
use getfit_pipeline::{ApiException, ApiReply, ErrorKind, Fault, Identity, RequestContext};
use serde_json::{Map, Value, json};
use tower::ServiceExt;
use tracing_subscriber::fmt::MakeWriter;

// ============================================================================
// Helpers
// ============================================================================

fn post(body: Value) -> RequestContext {
    RequestContext::new(Method::POST, "/api/v1/users/login")
        .with_identity(Identity::anonymous("203.0.113.5"))
        .with_body(body.as_object().cloned().unwrap_or_else(Map::new))
}

async fn call(svc: &PipelineService, ctx: RequestContext) -> ApiReply {
    let Ok(reply) = svc.clone().oneshot(ctx).await;
    reply
}

/// Handler counting its invocations and replying 200 with `payload`.
fn counting_handler(calls: Arc<AtomicUsize>, payload: Value) -> BoxHandler {
    handler_fn(move |_ctx| {
        let calls = calls.clone();
        let payload = payload.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Fault>(ApiReply::ok("Success", payload))
        }
    })
}

// ============================================================================
// Envelope & Exception Boundary
// ============================================================================

#[tokio::test]
async fn test_success_payload_is_unmodified() {
    let payload = json!({"classes": [{"id": 1, "name": "Yoga"}], "count": 1});
    let svc = Pipeline::new("list_classes")
        .log_requests()
        .wrap(counting_handler(Arc::new(AtomicUsize::new(0)), payload.clone()));

    let reply = call(&svc, RequestContext::new(Method::GET, "/api/v1/classes")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.envelope.data, Some(payload));
    assert_eq!(reply.envelope.error, None);
}

#[tokio::test]
async fn test_each_taxonomy_kind_maps_to_its_status() {
    let cases = [
        (ErrorKind::BadRequest, StatusCode::BAD_REQUEST, "Invalid date"),
        (ErrorKind::Unauthorized, StatusCode::UNAUTHORIZED, "Invalid credentials"),
        (ErrorKind::Forbidden, StatusCode::FORBIDDEN, "Admins only"),
        (ErrorKind::NotFound, StatusCode::NOT_FOUND, "Class not found"),
    ];

    for (kind, status, detail) in cases {
        let svc = Pipeline::new("raise")
            .log_requests()
            .wrap(handler_fn(move |_ctx| async move {
                Err::<ApiReply, Fault>(ApiException::new(kind).with_detail(detail).into())
            }));

        let reply = call(&svc, RequestContext::new(Method::GET, "/x")).await;
        assert_eq!(reply.status, status);
        assert_eq!(reply.envelope.error, Some(json!(detail)));
        assert_eq!(reply.envelope.data, None);
    }
}

#[tokio::test]
async fn test_unclassified_fault_is_generic_500() {
    let svc = Pipeline::new("crash")
        .log_requests()
        .require_fields(["email"])
        .wrap(handler_fn(|_ctx| async {
            Err::<ApiReply, Fault>(anyhow::anyhow!("secret=hunter2 leaked in panic text").into())
        }));

    let reply = call(&svc, post(json!({"email": "a@b.com"}))).await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.envelope.error, Some(json!(GENERIC_SERVER_ERROR)));
    let rendered = serde_json::to_string(&reply.envelope).unwrap();
    assert!(!rendered.contains("hunter2"));
}

#[tokio::test]
async fn test_internal_exception_detail_is_hidden() {
    let svc = Pipeline::new("db").wrap(handler_fn(|_ctx| async {
        Err::<ApiReply, Fault>(
            ApiException::internal(anyhow::anyhow!("pool exhausted"))
                .with_detail("pool exhausted")
                .into(),
        )
    }));

    let reply = call(&svc, RequestContext::new(Method::GET, "/x")).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.envelope.message, "Internal server error");
    assert_eq!(reply.envelope.error, Some(json!(GENERIC_SERVER_ERROR)));
}

// ============================================================================
// Field Validation
// ============================================================================

#[tokio::test]
async fn test_missing_password_never_reaches_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let svc = Pipeline::new("login")
        .log_requests()
        .require_fields(["email", "password"])
        .wrap(counting_handler(calls.clone(), json!(null)));

    let reply = call(&svc, post(json!({"email": "a@b.com"}))).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.envelope.error, Some(json!(["password"])));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_all_missing_fields_in_declared_order() {
    let svc = Pipeline::new("register")
        .require_fields(["a", "b"])
        .wrap(counting_handler(Arc::new(AtomicUsize::new(0)), json!(null)));

    let reply = call(&svc, post(json!({}))).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.envelope.message, "Validation error");
    assert_eq!(reply.envelope.error, Some(json!(["a", "b"])));
}

// ============================================================================
// Rate Limiting
// ============================================================================

#[tokio::test]
async fn test_fixed_window_with_simulated_clock() {
    let clock = ManualClock::new();
    let store = Arc::new(RateLimitStore::with_clock(Arc::new(clock.clone())));
    let layer = RateLimitLayer::with_store(store.clone(), 3, Duration::from_secs(60)).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let svc = Pipeline::new("book")
        .rate_limit(layer)
        .wrap(counting_handler(calls.clone(), json!(null)));

    for _ in 0..3 {
        assert_eq!(call(&svc, post(json!({}))).await.status, StatusCode::OK);
    }
    let rejected = call(&svc, post(json!({}))).await;
    assert_eq!(rejected.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(rejected.headers.contains_key("retry-after"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    clock.advance(Duration::from_secs(60));

    let reply = call(&svc, post(json!({}))).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers["x-ratelimit-remaining"], "2");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_calls_admit_exactly_max() {
    const CALLERS: usize = 50;

    let calls = Arc::new(AtomicUsize::new(0));
    let svc = Pipeline::new("book")
        .rate_limit(rate_limit(5, 60).unwrap())
        .wrap(counting_handler(calls.clone(), json!(null)));

    let tasks: Vec<_> = (0..CALLERS)
        .map(|_| {
            let svc = svc.clone();
            tokio::spawn(async move {
                let ctx = RequestContext::new(Method::POST, "/book")
                    .with_identity(Identity::User("same-user".into()));
                let Ok(reply) = svc.oneshot(ctx).await;
                reply.status
            })
        })
        .collect();

    let mut ok = 0;
    let mut limited = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(ok, 5);
    assert_eq!(limited, CALLERS - 5);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

// ============================================================================
// Request Logging
// ============================================================================

/// In-memory sink for JSON log lines.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Capture {
    /// `fields` of every record whose message is `message`.
    fn records(&self, message: &str) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .map(|record| record["fields"].clone())
            .filter(|fields| fields["message"] == message)
            .collect()
    }
}

async fn logged(svc: &PipelineService, ctx: RequestContext) -> (ApiReply, Capture) {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::INFO)
        .with_writer(capture.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let reply = call(svc, ctx).await;
    (reply, capture)
}

#[tokio::test]
async fn test_logger_emits_one_start_and_one_completion_on_success() {
    let svc = Pipeline::new("login")
        .log_requests()
        .wrap(counting_handler(Arc::new(AtomicUsize::new(0)), json!({"ok": true})));

    let (reply, capture) = logged(&svc, post(json!({"email": "a@b.com", "password": "pw"}))).await;

    let starts = capture.records("API request");
    let ends = capture.records("API response");
    assert_eq!(starts.len(), 1);
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0]["status"], json!(reply.status.as_u16()));
    assert_eq!(ends[0]["handler"], "login");

    // Secrets never reach the log.
    let params = starts[0]["params"].as_str().unwrap();
    assert!(params.contains("a@b.com"));
    assert!(!params.contains("\"pw\""));
    assert!(params.contains("[REDACTED]"));
}

#[tokio::test]
async fn test_logger_completion_status_matches_failure() {
    let svc = Pipeline::new("get_class")
        .log_requests()
        .wrap(handler_fn(|_ctx| async {
            Err::<ApiReply, Fault>(ApiException::not_found("Class not found").into())
        }));

    let (reply, capture) = logged(&svc, RequestContext::new(Method::GET, "/classes/9")).await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    let ends = capture.records("API response");
    assert_eq!(capture.records("API request").len(), 1);
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0]["status"], json!(404));
    assert_eq!(ends[0]["outcome"], "error");
}

#[tokio::test]
async fn test_logger_outside_validation_sees_rejection() {
    let svc = Pipeline::new("login")
        .log_requests()
        .require_fields(["password"])
        .wrap(counting_handler(Arc::new(AtomicUsize::new(0)), json!(null)));

    let (reply, capture) = logged(&svc, post(json!({}))).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    let ends = capture.records("API response");
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0]["status"], json!(400));
}

#[tokio::test]
async fn test_undecodable_request_is_logged_and_counted() {
    let calls = Arc::new(AtomicUsize::new(0));
    let limiter = rate_limit(1, 60).unwrap();
    let store = limiter.store().clone();
    let svc = Pipeline::new("login")
        .log_requests()
        .rate_limit(limiter)
        .require_fields(["email"])
        .wrap(counting_handler(calls.clone(), json!(null)));

    let malformed = || post(json!({})).with_decode_error("Malformed JSON in request body");
    let (reply, capture) = logged(&svc, malformed()).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.envelope.error, Some(json!("Malformed JSON in request body")));
    assert_eq!(capture.records("API request").len(), 1);
    let ends = capture.records("API response");
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0]["status"], json!(400));
    assert_eq!(store.len(), 1);

    // The malformed call used up the allowance.
    let reply = call(&svc, post(json!({"email": "a@b.com"}))).await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_handler_panic_is_logged_as_500() {
    let svc = Pipeline::new("boom")
        .log_requests()
        .wrap(handler_fn(|ctx: RequestContext| async move {
            if !ctx.path.is_empty() {
                panic!("secret=hunter2 index out of bounds");
            }
            Ok::<_, Fault>(ApiReply::ok("Success", json!(null)))
        }));

    let (reply, capture) = logged(&svc, RequestContext::new(Method::GET, "/boom")).await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.envelope.error, Some(json!(GENERIC_SERVER_ERROR)));
    let ends = capture.records("API response");
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0]["status"], json!(500));
    assert_eq!(ends[0]["outcome"], "error");
}
