use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn health_reports_every_store() {
    let app = common::create_test_app();
    let (status, body) = app.request("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    for store in ["attempts", "quotas", "progress"] {
        assert_eq!(body["dependencies"][store]["status"], "healthy");
    }
}

#[tokio::test]
async fn metrics_require_basic_auth() {
    let app = common::create_test_app();

    let (status, _) = app.request("GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = general_purpose::STANDARD.encode("metrics:nope");
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header("authorization", format!("Basic {}", wrong))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn metrics_expose_attempt_counters() {
    let app = common::create_test_app();
    let token = app.token("user-1", "Uma");
    app.start(&token, "quiz-1").await;

    let credentials = general_purpose::STANDARD.encode("metrics:secret");
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header("authorization", format!("Basic {}", credentials))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("attempts_total{outcome=\"created\"}"));
    // live-attempt counts are not exported; the sweeper runs in another process
    assert!(!text.contains("attempts_active"));
}

#[tokio::test]
async fn responses_carry_a_trace_id() {
    let app = common::create_test_app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-trace-id", "trace-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-trace-id"], "trace-123");
}
