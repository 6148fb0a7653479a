//! HTTP surface tests driven through the router without a socket.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

use common::{Fakes, Harness};
use storyloom::api::{ApiServer, ApiServerConfig, AppState};
use storyloom::logging::{DEFAULT_LOG_FILTER, LoggingConfig};
use storyloom::storage::{OrphanReclaimer, ReclaimerConfig};
use tokio_util::sync::CancellationToken;

struct TestApp {
    router: Router,
    // Keeps the temporary database and media root alive.
    _dir: tempfile::TempDir,
    // The filter handle only works while its layer exists.
    _filter_layer: reload::Layer<EnvFilter, Registry>,
}

async fn test_app() -> TestApp {
    let Harness {
        dir,
        storage,
        artifacts,
        manager,
        ..
    } = Harness::new(Fakes::default()).await;

    let media_dir = storage.root().to_path_buf();
    let reclaimer = Arc::new(OrphanReclaimer::new(
        storage,
        artifacts,
        ReclaimerConfig::default(),
    ));
    let (filter_layer, filter_handle) = reload::Layer::new(EnvFilter::new(DEFAULT_LOG_FILTER));
    let logging = Arc::new(LoggingConfig::new(filter_handle, dir.path().join("logs")));
    let state = AppState::new(Arc::new(manager), reclaimer).with_logging_config(logging);
    let config = ApiServerConfig {
        media_dir: Some(media_dir),
        ..ApiServerConfig::default()
    };
    let server = ApiServer::new(config, state, CancellationToken::new());

    TestApp {
        router: server.build_router(),
        _dir: dir,
        _filter_layer: filter_layer,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_reports_alive() {
    let app = test_app().await;
    let (status, body) = send(&app.router, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
    assert_eq!(body["active_tasks"], 0);
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let app = test_app().await;
    let (status, body) = send(&app.router, get("/api/tasks/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("does-not-exist"));
}

#[tokio::test]
async fn test_book_request_is_accepted_and_pollable() {
    let app = test_app().await;
    let request = post_json(
        "/api/generate/book?task_id=book-http-1",
        json!({"child_name": "Mia", "theme_topic": "brushing teeth", "page_count": 3}),
    );
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["task_id"], "book-http-1");
    assert_eq!(body["status"], "pending");

    let mut finished = Value::Null;
    for _ in 0..500 {
        let (status, task) = send(&app.router, get("/api/tasks/book-http-1")).await;
        assert_eq!(status, StatusCode::OK);
        if task["status"] == "completed" {
            finished = task;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(finished["progress"], 100);

    let (status, logs) = send(&app.router, get("/api/tasks/book-http-1/logs")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(logs["total"].as_u64().unwrap() > 0);

    // Reusing the id is a conflict.
    let again = post_json(
        "/api/generate/book?task_id=book-http-1",
        json!({"child_name": "Mia", "theme_topic": "brushing teeth"}),
    );
    let (status, _) = send(&app.router, again).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_book_request_is_rejected() {
    let app = test_app().await;
    let request = post_json(
        "/api/generate/book",
        json!({"child_name": "  ", "theme_topic": "brushing teeth"}),
    );
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("child_name"));
}

#[tokio::test]
async fn test_storage_cleanup_defaults_to_dry_run() {
    let app = test_app().await;

    let (status, report) = send(
        &app.router,
        Request::builder()
            .method("POST")
            .uri("/api/admin/storage/cleanup")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["deleted_files"], 0);

    let (status, _) = send(&app.router, get("/api/admin/storage/stats?min_age_hours=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_log_filter_can_be_read_and_replaced() {
    let app = test_app().await;

    let (status, body) = send(&app.router, get("/api/admin/logging")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["filter"].as_str().unwrap().contains("storyloom=info"));

    let update = |filter: &str| {
        Request::builder()
            .method("PUT")
            .uri("/api/admin/logging")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "filter": filter }).to_string()))
            .unwrap()
    };

    let (status, body) = send(&app.router, update("storyloom=debug")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["filter"].as_str().unwrap().contains("storyloom=debug"));

    let (status, _) = send(&app.router, update("storyloom=loudest")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app.router, get("/api/admin/logging")).await;
    assert!(body["filter"].as_str().unwrap().contains("storyloom=debug"));
}

#[tokio::test]
async fn test_book_video_for_unknown_artifact_is_not_found() {
    let app = test_app().await;
    let request = post_json("/api/generate/book-video/no-such-book", json!({}));
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("no-such-book"));
}
