mod common;

use arha_control_plane::{api, state::AppState};
use common::{Harness, GPU_B};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    harness: Harness,
}

async fn spawn_server() -> TestServer {
    let harness = Harness::new();
    let app = api::create_router(AppState::new(harness.controller.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        harness,
    }
}

impl TestServer {
    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn health_endpoints_answer() {
    let server = spawn_server().await;

    assert_eq!(server.get("/livez").await.status(), StatusCode::OK);

    for path in ["/healthz", "/readyz"] {
        let resp = server.get(path).await;
        assert_eq!(resp.status(), StatusCode::OK, "{path}");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }
}

#[tokio::test]
async fn subscribe_returns_instance_and_rate() {
    let server = spawn_server().await;

    let resp = server
        .post(
            "/v1/subscribe",
            json!({"ip": "10.1.0.1", "port": 8888, "serviceType": "pose"}),
        )
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"ip": GPU_B, "port": 30500, "frequency": 20.0}));

    let instances: Value = server.get("/v1/instances").await.json().await.unwrap();
    assert_eq!(instances["items"].as_array().unwrap().len(), 1);
    assert_eq!(instances["items"][0]["currentConnection"], 1);

    let subscriptions: Value = server.get("/v1/subscriptions").await.json().await.unwrap();
    assert_eq!(subscriptions["items"][0]["agentPort"], 8888);
    server.harness.assert_consistent();
}

#[tokio::test]
async fn unknown_service_type_is_a_problem_document() {
    let server = spawn_server().await;

    let resp = server
        .client
        .post(format!("{}/v1/subscribe", server.base_url))
        .header("x-request-id", "req-123")
        .json(&json!({"ip": "10.1.0.1", "port": 8888, "serviceType": "lidar"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers()["x-request-id"], "req-123");
    assert_eq!(resp.headers()["content-type"], "application/problem+json");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "unknown_service_type");
    assert_eq!(body["request_id"], "req-123");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn capacity_rejection_maps_to_conflict() {
    let server = spawn_server().await;
    server.harness.subscribe_many("pose", 15).await;

    let resp = server
        .post(
            "/v1/subscribe",
            json!({"ip": "10.1.0.2", "port": 8888, "serviceType": "pose"}),
        )
        .await;

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "insufficient_resources");
}

#[tokio::test]
async fn unsubscribe_reports_removed_count() {
    let server = spawn_server().await;
    server.harness.subscribe_many("pose", 1).await;

    let resp = server
        .post("/v1/unsubscribe", json!({"ip": "10.1.0.1", "port": 9000}))
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["removed"], 1);
    server.harness.assert_consistent();
}

#[tokio::test]
async fn pod_failure_alert_triggers_recovery() {
    let server = spawn_server().await;
    server.harness.subscribe_many("pose", 2).await;

    let resp = server
        .post(
            "/v1/alerts",
            json!({"alertType": "pod_failure", "alertContent": {"podName": "pose-gpu-b-30500"}}),
        )
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"removed": ["pose-gpu-b-30500"], "evicted": 0}));
    server.harness.assert_consistent();
}

#[tokio::test]
async fn deploy_creates_instance_on_named_node() {
    let server = spawn_server().await;

    let resp = server
        .post("/v1/deploy", json!({"serviceType": "object", "nodeName": "gpu-a"}))
        .await;

    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["nodeName"], "gpu-a");
    assert_eq!(body["serviceType"], "object");
    assert_eq!(body["workloadLimit"], 170.0);
}

#[tokio::test]
async fn nodes_endpoint_serves_cached_health() {
    let server = spawn_server().await;

    let before: Value = server.get("/v1/nodes").await.json().await.unwrap();
    assert_eq!(before["refreshed_at"], Value::Null);

    server.harness.controller.refresh_node_status().await.unwrap();

    let after: Value = server.get("/v1/nodes").await.json().await.unwrap();
    assert_eq!(after["nodes"]["gpu-a"], "healthy");
    assert!(after["refreshed_at"].is_string());
}
