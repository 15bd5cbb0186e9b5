//! Integration tests for the HTTP API
//!
//! Tests cover:
//! - Deploy through the API with a JSON body
//! - Error bodies and status codes
//! - Guarded steps reporting skipped outcomes
//! - Request id propagation and health

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::Harness;
use operate_backend::api::{self, ApiState};
use operate_backend::health::HealthChecker;

const HASH: &str = "bafybeiapi";

fn create_test_app(harness: &Harness) -> Router {
    api::app(ApiState {
        manager: harness.manager.clone(),
        health_checker: HealthChecker::new(harness.dir.path(), Vec::new()),
    })
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(value) => Body::from(serde_json::to_vec(&value).unwrap()),
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn deploy_body() -> Value {
    json!({
        "rpc": common::RPC,
        "chain": "gnosis",
        "userParams": {
            "useStaking": false,
            "olasCostOfBond": 30,
            "olasRequiredToStake": 30,
            "costOfBond": 1000,
            "threshold": 2,
            "agentId": 25,
            "nftReference": "bafybeinft",
            "numberOfAgents": 2,
            "fundRequirements": { "agent": 100, "safe": 500 }
        }
    })
}

#[tokio::test]
async fn test_deploy_and_get_service() {
    let harness = Harness::new(0);
    let app = create_test_app(&harness);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/services/{}/deploy", HASH),
        Some(deploy_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hash"], HASH);
    assert_eq!(body["chainData"]["onChainState"], "DEPLOYED");
    assert_eq!(body["chainData"]["token"], 1);
    assert_eq!(body["ledgerConfig"]["type"], "ethereum");

    let (status, body) = send(&app, "GET", &format!("/api/services/{}", HASH), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["keys"].as_array().unwrap().len(), 2);

    let (status, body) = send(&app, "GET", "/api/services", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["onChainState"], "DEPLOYED");
}

#[tokio::test]
async fn test_missing_service_returns_not_found_body() {
    let harness = Harness::new(0);
    let app = create_test_app(&harness);

    let (status, body) = send(&app, "GET", "/api/services/bafybeimissing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
    assert_eq!(body["details"]["hash"], "bafybeimissing");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_deploy_without_params_is_unprocessable() {
    let harness = Harness::new(0);
    let app = create_test_app(&harness);

    let (status, body) = send(&app, "POST", &format!("/api/services/{}/deploy", HASH), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "MISSING_PARAMETER");
    assert_eq!(body["details"]["parameter"], "rpc");
}

#[tokio::test]
async fn test_insufficient_balance_body() {
    let harness = Harness::new(50);
    let app = create_test_app(&harness);
    let mut request = deploy_body();
    request["userParams"]["useStaking"] = json!(true);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/services/{}/deploy", HASH),
        Some(request),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "INSUFFICIENT_BALANCE");
    assert_eq!(body["details"]["required"], "60");
    assert_eq!(body["details"]["actual"], "50");
}

#[tokio::test]
async fn test_skipped_step_outcome() {
    let harness = Harness::new(0);
    let app = create_test_app(&harness);
    send(
        &app,
        "POST",
        &format!("/api/services/{}/deploy", HASH),
        Some(deploy_body()),
    )
    .await;

    let (status, body) = send(&app, "POST", &format!("/api/services/{}/stake", HASH), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "skipped");
    assert!(body["reason"].as_str().unwrap().contains("useStaking"));

    let (status, body) =
        send(&app, "POST", &format!("/api/services/{}/terminate", HASH), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "applied");
}

#[tokio::test]
async fn test_update_endpoint() {
    let harness = Harness::new(0);
    let app = create_test_app(&harness);
    send(
        &app,
        "POST",
        &format!("/api/services/{}/deploy", HASH),
        Some(deploy_body()),
    )
    .await;

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/services/{}", HASH),
        Some(json!({ "newHash": "bafybeiapinew" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hash"], "bafybeiapinew");
    assert_eq!(body["chainData"]["token"], 2);

    let (status, _) = send(&app, "GET", &format!("/api/services/{}", HASH), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let harness = Harness::new(0);
    let app = create_test_app(&harness);

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/services/{}", HASH))
                .body(Body::from("{\"newHash\":"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let harness = Harness::new(0);
    let app = create_test_app(&harness);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response.headers().get("x-request-id").unwrap();
    assert!(uuid::Uuid::parse_str(request_id.to_str().unwrap()).is_ok());
}
