use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use cognitive_engine::cognitive::now_ms;

mod common;

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_root() {
    let (app, _) = common::create_test_app();
    let (status, body) = send(app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn test_health_metrics() {
    let (app, _) = common::create_test_app();
    let (status, body) = send(app, get("/health/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["signalsAccepted"], 0);
}

#[tokio::test]
async fn test_malformed_signal_body_still_gets_an_ack() {
    let (app, engine) = common::create_test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/signals")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], false);
    assert_eq!(body["code"], "MALFORMED_PAYLOAD");
    assert_eq!(engine.metrics().snapshot().rejected_malformed, 1);
}

#[tokio::test]
async fn test_signal_batch_returns_one_ack_per_event() {
    let (app, _) = common::create_test_app();
    let ts = now_ms() - 1_000;
    let batch = json!([
        {"sessionId": "s1", "learnerId": "kai", "contextId": "p1", "kind": "hover", "value": 2000, "timestamp": ts},
        {"sessionId": "s1", "learnerId": "kai", "contextId": "p1", "kind": "warp", "value": 1, "timestamp": ts},
        {"learnerId": "kai"}
    ]);

    let (status, body) = send(app, post_json("/api/v1/signals", batch)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let acks = body.as_array().unwrap();
    assert_eq!(acks.len(), 3);
    assert_eq!(acks[0]["accepted"], true);
    assert_eq!(acks[1]["code"], "UNKNOWN_KIND");
    assert_eq!(acks[2]["code"], "MALFORMED_PAYLOAD");
}

#[tokio::test]
async fn test_review_then_schedule_and_profile() {
    let (app, _) = common::create_test_app();
    let review = json!({
        "reviewId": "rv-1",
        "learnerId": "lou",
        "itemId": "triangle-area",
        "contentType": "mathematical",
        "reviewedAt": "2024-06-03T10:00:00Z",
        "correct": true,
        "latencyMs": 8000
    });

    let (status, body) = send(app.clone(), post_json("/api/v1/reviews", review.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["applied"], true);
    let interval = body["data"]["intervalHours"].as_f64().unwrap();
    assert!((interval - 46.8).abs() < 1e-9);

    let (status, body) = send(app.clone(), post_json("/api/v1/reviews", review)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["applied"], false);

    let stale = json!({
        "reviewId": "rv-0",
        "learnerId": "lou",
        "itemId": "triangle-area",
        "contentType": "mathematical",
        "reviewedAt": "2024-06-03T09:00:00Z",
        "correct": false
    });
    let (status, body) = send(app.clone(), post_json("/api/v1/reviews", stale)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "STALE_REVIEW");

    let (status, body) = send(app.clone(), get("/api/v1/schedule/lou/mathematical")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["items"][0]["itemId"], "triangle-area");

    let (status, body) = send(app.clone(), get("/api/v1/schedule/lou/interpretive-dance")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = send(
        app.clone(),
        get("/api/v1/learners/lou/profile?contentType=mathematical"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stability"]["status"], "underfit");
    assert_eq!(body["data"]["scheduledItems"], 1);

    let (status, body) = send(app, get("/api/v1/learners/lou/profile")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_session_end_records_outcome() {
    let (app, _) = common::create_test_app();
    let outcome = json!({
        "endedAt": "2024-06-03T11:00:00Z",
        "scheduledReviews": 10,
        "completedReviews": 9,
        "attempts": 9,
        "correct": 8,
        "timeOnTaskSecs": 1500.0
    });

    let (status, body) = send(
        app.clone(),
        post_json("/api/v1/sessions/max/lesson-1/end", outcome),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["session"].is_null());
    assert_eq!(body["data"]["alerts"].as_array().unwrap().len(), 0);

    let (status, body) = send(app.clone(), get("/api/v1/learners/max/alerts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["open"], 0);

    let (status, _) = send(app, get("/api/v1/sessions/max/lesson-1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_export_and_delete_learner() {
    let (app, _) = common::create_test_app();
    let review = json!({
        "learnerId": "nia",
        "itemId": "cell-wall",
        "contentType": "visual",
        "correct": false,
        "hintCount": 2
    });
    let (status, _) = send(app.clone(), post_json("/api/v1/reviews", review)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(app.clone(), get("/api/v1/learners/nia/export")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["reviews"].as_array().unwrap().len(), 1);

    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/v1/learners/nia")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app.clone(), delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], true);

    let (status, body) = send(app, get("/api/v1/learners/nia/export")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let (app, _) = common::create_test_app();
    let (status, body) = send(app, get("/api/v1/nothing-here")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}
