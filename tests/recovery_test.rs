//! Panic recovery and request logging.

mod common;

use common::{LogCapture, get, send};
use futures_util::stream;
use http::StatusCode;
use sluice::middleware::{Recovery, SchemaGate, stack, with_recovery, with_request_logging};
use sluice::{ContentType, Request, Response, Router};

async fn boom(_req: Request) -> Response {
    panic!("boom");
}

async fn hello(_req: Request) -> Response {
    Response::text("hello world")
}

async fn missing(_req: Request) -> Response {
    Response::builder().status(StatusCode::NOT_FOUND).text("no such user")
}

async fn chunked(_req: Request) -> Response {
    let chunks: Vec<Result<bytes::Bytes, std::io::Error>> =
        vec![Ok("ab".into()), Ok("cde".into()), Ok("f".into())];
    Response::builder().stream(ContentType::Text, stream::iter(chunks))
}

fn app() -> Router {
    Router::new()
        .get("/boom", boom)
        .get("/hello", hello)
        .get("/missing", missing)
        .get("/chunked", chunked)
}

// === Recovery ===

#[tokio::test]
async fn panic_becomes_500_and_is_logged_with_trace() {
    let logs = LogCapture::default();
    let handler = with_recovery(app(), logs.logger());

    let (status, body) = send(&handler, get("/boom")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Internal Server Error");

    let out = logs.contents();
    assert!(out.contains("Unhandled panic"));
    assert!(out.contains("panic=boom"));
    assert!(out.contains("traceback="));
    assert!(out.contains("recovery_test.rs"), "location missing from: {out}");
}

#[tokio::test]
async fn later_requests_still_succeed() {
    let logs = LogCapture::default();
    let handler = with_recovery(app(), logs.logger());

    let (first, _) = send(&handler, get("/boom")).await;
    let (second, body) = send(&handler, get("/hello")).await;

    assert_eq!(first, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body, "hello world");
}

#[tokio::test]
async fn panic_before_the_future_exists_is_caught() {
    let logs = LogCapture::default();
    let eager = |_req: Request| -> std::future::Ready<Response> { panic!("eager") };
    let handler = with_recovery(eager, logs.logger());

    let (status, _) = send(&handler, get("/")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(logs.contents().contains("panic=eager"));
}

#[tokio::test]
async fn trace_is_sent_only_when_exposed() {
    let logs = LogCapture::default();
    let handler = Recovery::new(logs.logger()).expose_trace(true).wrap(app());

    let (status, body) = send(&handler, get("/boom")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("handler panicked: boom"));
}

// === Request logging ===

#[tokio::test]
async fn success_is_logged_once_at_info_with_size() {
    let logs = LogCapture::default();
    let handler = with_request_logging(app(), logs.logger());

    let (status, _) = send(&handler, get("/hello")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs.records_at("INFO"), 1);
    let out = logs.contents();
    assert!(out.contains("status=200"));
    assert!(out.contains("size=11"));
    assert!(out.contains("method=GET"));
    assert!(out.contains("uri=/hello"));
    assert!(out.contains("proto=HTTP/1.1"));
}

#[tokio::test]
async fn streamed_body_size_is_the_sum_of_chunks() {
    let logs = LogCapture::default();
    let handler = with_request_logging(app(), logs.logger());

    let (_, body) = send(&handler, get("/chunked")).await;

    assert_eq!(body, "abcdef");
    assert!(logs.contents().contains("size=6"));
}

#[tokio::test]
async fn client_error_is_logged_at_warn_with_body() {
    let logs = LogCapture::default();
    let handler = with_request_logging(app(), logs.logger());

    let (status, body) = send(&handler, get("/missing")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "no such user");
    assert_eq!(logs.records_at("WARN"), 1);
    assert!(logs.contents().contains("body=no such user"));
}

// === Full chain ===

#[tokio::test]
async fn stack_logs_fault_exactly_once() {
    let logs = LogCapture::default();
    let handler = stack(app(), Recovery::new(logs.logger()), None);

    let (status, _) = send(&handler, get("/boom")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(logs.records_at("ERROR"), 1);
    assert_eq!(logs.records_at("INFO"), 0);

    let out = logs.contents();
    assert!(out.contains("status=500"), "{out}");
    assert!(out.contains("method=GET"), "{out}");
    assert!(out.contains("proto=HTTP/1.1"), "{out}");
    assert!(out.contains("uri=/boom"), "{out}");
    assert!(out.contains("took="), "{out}");
    assert!(out.contains("size=21"), "{out}");
}

#[tokio::test]
async fn stack_gate_rejects_before_logging_sees_the_request() {
    let logs = LogCapture::default();
    let gate = SchemaGate::from_value(&serde_json::json!({"type": "object"})).unwrap();
    let handler = stack(app(), Recovery::new(logs.logger()), Some(&gate));

    let req = common::post("/hello", "[1, 2]");
    let (status, _) = send(&handler, req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(logs.contents().is_empty());
}
