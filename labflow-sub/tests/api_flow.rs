//! HTTP API tests over the full router

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use labflow_common::db::init_memory_database;
use labflow_sub::api::{build_router, AppContext};
use labflow_sub::db;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn test_app() -> Router {
    let pool = init_memory_database().await.unwrap();
    let registry = db::load_registry(&pool).await.unwrap();
    build_router(AppContext {
        db: pool,
        registry: Arc::new(registry),
    })
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn order_body(request_types: Value, assets: Value) -> Value {
    json!({
        "study_id": 1,
        "project_id": 1,
        "request_types": request_types,
        "assets": assets,
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn full_submission_lifecycle() {
    let app = test_app().await;

    let (status, created) = send(
        &app,
        "POST",
        "/submissions",
        Some(json!({
            "name": "WGS batch",
            "orders": [order_body(json!([1, 3]), json!([10, 11]))],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["state"], "building");
    let guid = created["guid"].as_str().unwrap().to_string();

    let (status, processed) =
        send(&app, "POST", &format!("/submissions/{}/process", guid), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(processed["state"], "ready");
    let requests = processed["requests"].as_array().unwrap();
    assert_eq!(requests.len(), 4);

    // Drive the first library creation request through its lifecycle
    let first = requests[0]["guid"].as_str().unwrap();
    let (status, _) = send(&app, "POST", &format!("/requests/{}/start", first), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, passed) = send(&app, "POST", &format!("/requests/{}/pass", first), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(passed["updated"][0]["state"], "passed");

    // Downstream resolution maps it to the first sequencing request
    let (status, next) = send(&app, "GET", &format!("/requests/{}/next", first), None).await;
    assert_eq!(status, StatusCode::OK);
    let next = next.as_array().unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0]["request_type_id"], 3);

    let (status, fetched) = send(&app, "GET", &format!("/submissions/{}", guid), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["requests"][0]["state"], "passed");
}

#[tokio::test]
async fn incompatible_orders_return_structured_422() {
    let app = test_app().await;

    let mut contaminated = order_body(json!([1]), json!([12]));
    contaminated["study_metadata"] = json!({
        "contaminated_human_dna": true,
        "remove_x_and_autosomes": false,
    });
    let (_, created) = send(
        &app,
        "POST",
        "/submissions",
        Some(json!({
            "orders": [order_body(json!([1]), json!([10])), contaminated],
        })),
    )
    .await;
    let guid = created["guid"].as_str().unwrap();

    let (status, body) =
        send(&app, "POST", &format!("/submissions/{}/process", guid), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let details = body["details"]["errors"].as_array().unwrap();
    assert!(details.iter().any(|e| e["field"] == "study"));

    // The failure is recorded on the submission
    let (_, fetched) = send(&app, "GET", &format!("/submissions/{}", guid), None).await;
    assert_eq!(fetched["state"], "failed");
    assert!(fetched["message"].as_str().unwrap().contains("study"));
}

#[tokio::test]
async fn illegal_transition_is_a_conflict() {
    let app = test_app().await;
    let (_, created) = send(
        &app,
        "POST",
        "/submissions",
        Some(json!({ "orders": [order_body(json!([1]), json!([10]))] })),
    )
    .await;
    let guid = created["guid"].as_str().unwrap().to_string();
    let (_, processed) =
        send(&app, "POST", &format!("/submissions/{}/process", guid), None).await;
    let request = processed["requests"][0]["guid"].as_str().unwrap().to_string();

    // Passing a pending request skips started
    let (status, body) = send(&app, "POST", &format!("/requests/{}/pass", request), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("pending"));

    // And the request is unchanged
    let (_, fetched) = send(&app, "GET", &format!("/requests/{}", request), None).await;
    assert_eq!(fetched["state"], "pending");
}

#[tokio::test]
async fn deletion_is_blocked_after_processing() {
    let app = test_app().await;
    let (_, created) = send(
        &app,
        "POST",
        "/submissions",
        Some(json!({ "orders": [order_body(json!([1]), json!([10]))] })),
    )
    .await;
    let guid = created["guid"].as_str().unwrap().to_string();

    send(&app, "POST", &format!("/submissions/{}/process", guid), None).await;
    let (status, _) = send(&app, "DELETE", &format!("/submissions/{}", guid), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, building) = send(
        &app,
        "POST",
        "/submissions",
        Some(json!({ "orders": [order_body(json!([1]), json!([11]))] })),
    )
    .await;
    let guid = building["guid"].as_str().unwrap();
    let (status, _) = send(&app, "DELETE", &format!("/submissions/{}", guid), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn unknown_guids_return_404() {
    let app = test_app().await;
    let missing = uuid::Uuid::new_v4();
    let (status, _) = send(&app, "GET", &format!("/submissions/{}", missing), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "GET", &format!("/requests/{}/next", missing), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn readiness_endpoint_tracks_upstream() {
    let app = test_app().await;
    let (_, created) = send(
        &app,
        "POST",
        "/submissions",
        Some(json!({ "orders": [order_body(json!([1, 3]), json!([10]))] })),
    )
    .await;
    let guid = created["guid"].as_str().unwrap().to_string();
    let (_, processed) =
        send(&app, "POST", &format!("/submissions/{}/process", guid), None).await;
    let library = processed["requests"][0]["guid"].as_str().unwrap().to_string();

    // Non-sequencing requests are always ready
    let (status, body) = send(&app, "GET", &format!("/requests/{}/ready", library), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}
