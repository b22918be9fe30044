//! Integration tests for the HTTP API
//!
//! Routers are built over an in-memory SQLite database and driven with
//! `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tower::util::ServiceExt; // for `oneshot` method
use viewrec_common::config::EngagementConfig;
use viewrec_common::db::{create_schema, upsert_content, upsert_viewer};
use viewrec_common::events::EventBus;
use viewrec_common::models::{ContentKind, ContentSummary, CreatorSummary};
use viewrec_common::{ContentId, ViewerId};
use viewrec_engine::{
    build_router, AppState, SqliteLedger, TokioTimer, ViewAggregator, ViewLedger, ViewRecorder,
    ViewTracker,
};

/// Test helper: in-memory database with schema
async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Should open in-memory database");
    create_schema(&pool).await.expect("Should create schema");
    pool
}

/// Test helper: router over `pool` with the paid-image gate off
fn setup_app(pool: SqlitePool) -> Router {
    let config = EngagementConfig {
        require_entitlement: false,
        ..EngagementConfig::default()
    };
    let ledger = Arc::new(SqliteLedger::new(pool));
    let events = Arc::new(EventBus::default());
    let recorder = ViewRecorder::new(ledger.clone(), config.ledger_timeout()).with_events(events.clone());
    let aggregator = ViewAggregator::new(ledger.clone(), config.clone());
    let tracker = ViewTracker::new(config, recorder, ledger, Arc::new(TokioTimer), events.clone());
    build_router(AppState::new(tracker, aggregator, events))
}

fn json_request(method: &str, uri: &str, viewer: Option<ViewerId>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(viewer) = viewer {
        builder = builder.header("x-viewer-id", viewer.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

async fn register(app: &Router, viewer: Option<ViewerId>, content: ContentId, kind: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/elements",
            viewer,
            json!({
                "content_id": content,
                "creator_id": ViewerId::new(),
                "kind": kind,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    extract_json(response.into_body()).await
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup_app(setup_test_db().await);

    let response = app.oneshot(empty_request("GET", "/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "viewrec-engine");
    assert!(body["version"].is_string());
}

// =============================================================================
// Element lifecycle
// =============================================================================

#[tokio::test]
async fn test_click_records_view_and_counts() {
    let pool = setup_test_db().await;
    let app = setup_app(pool.clone());
    let viewer = ViewerId::new();
    let content = ContentId::new();

    let body = register(&app, Some(viewer), content, "image").await;
    assert_eq!(body["tracking"], true);
    let element_id = body["element_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/elements/{}/events", element_id),
            None,
            json!({"type": "click"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(extract_json(response.into_body()).await["delivered"], 1);

    // Recording happens on the instance task
    let ledger = SqliteLedger::new(pool);
    for _ in 0..100 {
        if ledger.count(content).await.unwrap() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("/api/content/{}/views", content)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["views"], 1);
    assert_eq!(body["content_id"], content.to_string());
}

#[tokio::test]
async fn test_anonymous_registration_is_untracked() {
    let app = setup_app(setup_test_db().await);

    let body = register(&app, None, ContentId::new(), "media").await;

    assert_eq!(body["tracking"], false);
    assert!(body["element_id"].is_string());
}

#[tokio::test]
async fn test_invalid_viewer_header_rejected() {
    let app = setup_app(setup_test_db().await);

    let request = Request::builder()
        .method("POST")
        .uri("/api/elements")
        .header("content-type", "application/json")
        .header("x-viewer-id", "nobody")
        .body(Body::from(
            json!({
                "content_id": ContentId::new(),
                "creator_id": ViewerId::new(),
                "kind": "image",
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"], "BAD_REQUEST");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_unknown_element_is_404() {
    let app = setup_app(setup_test_db().await);
    let missing = uuid::Uuid::new_v4();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/elements/{}/events", missing),
            None,
            json!({"type": "pointer_enter"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(extract_json(response.into_body()).await["error"], "NOT_FOUND");

    let response = app
        .oneshot(empty_request("DELETE", &format!("/api/elements/{}", missing)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unmount_then_events_are_404() {
    let app = setup_app(setup_test_db().await);
    let body = register(&app, Some(ViewerId::new()), ContentId::new(), "image").await;
    let element_id = body["element_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", &format!("/api/elements/{}", element_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/api/elements/{}/events", element_id),
            None,
            json!({"type": "intersection", "ratio": 0.9}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Read side
// =============================================================================

#[tokio::test]
async fn test_history_with_metadata_and_limit() {
    let pool = setup_test_db().await;
    let app = setup_app(pool.clone());
    let ledger = SqliteLedger::new(pool.clone());
    let viewer = ViewerId::new();
    let creator = CreatorSummary {
        id: ViewerId::new(),
        display_name: "Noor".to_string(),
    };
    upsert_viewer(&pool, &creator).await.unwrap();

    let base = Utc::now();
    for (i, title) in ["dawn", "noon", "dusk"].iter().enumerate() {
        let content = ContentSummary {
            id: ContentId::new(),
            creator_id: creator.id,
            title: title.to_string(),
            kind: ContentKind::Image,
        };
        upsert_content(&pool, &content).await.unwrap();
        ledger
            .insert(viewer, content.id, base + chrono::Duration::seconds(i as i64))
            .await
            .unwrap();
    }

    let response = app
        .oneshot(empty_request("GET", &format!("/api/viewers/{}/history?limit=2", viewer)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["content"]["title"], "dusk");
    assert_eq!(entries[0]["creator"]["display_name"], "Noor");
    assert_eq!(entries[1]["content"]["title"], "noon");
    assert!(body["error"].is_null());
}

#[tokio::test]
async fn test_history_failure_still_200() {
    let pool = setup_test_db().await;
    let app = setup_app(pool.clone());
    pool.close().await;

    let response = app
        .oneshot(empty_request("GET", &format!("/api/viewers/{}/history", ViewerId::new())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["entries"].as_array().unwrap().len(), 0);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_count_failure_is_500() {
    let pool = setup_test_db().await;
    let app = setup_app(pool.clone());
    pool.close().await;

    let response = app
        .oneshot(empty_request("GET", &format!("/api/content/{}/views", ContentId::new())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(extract_json(response.into_body()).await["error"], "LEDGER_ERROR");
}
