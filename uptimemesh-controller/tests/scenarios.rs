//! End-to-end scenarios against the full HTTP surface (admin API + agent
//! fallback), driven the way `adk-studio`'s `cors_tests.rs` drives its
//! router: build it, `oneshot` requests through `tower::ServiceExt`, no
//! socket bound.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;
use uptimemesh_controller::external_addr::ExternalAddressCache;
use uptimemesh_controller::session::SessionManager;
use uptimemesh_controller::{router, AppState, ControllerConfig};
use uptimemesh_store::SqliteStore;

async fn test_app() -> (axum::Router, String, Arc<dyn uptimemesh_store::Store>) {
    let pool = uptimemesh_store::connect(":memory:").await.unwrap();
    let store: Arc<dyn uptimemesh_store::Store> = Arc::new(SqliteStore::new(pool));
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig::new("127.0.0.1:0", ":memory:", dir.path().join("bootstrap.key"));
    let bootstrap_key = uptimemesh_store::keys::read_or_create_bootstrap_key_file(&config.bootstrap_key_path).unwrap();
    let sessions = SessionManager::new(config.session_write_deadline);
    let external_addr = ExternalAddressCache::new(config.remote_ip_cache_ttl);
    let state = AppState {
        store: store.clone(),
        sessions,
        bootstrap_key: bootstrap_key.clone(),
        config: Arc::new(config),
        external_addr,
    };
    (router(state), bootstrap_key, store)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn test_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 54321))
}

async fn post(app: &axum::Router, uri: &str, headers: &[(&str, &str)], body: Value) -> axum::response::Response {
    let mut builder = Request::builder().method("POST").uri(uri).header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let mut request = builder.body(Body::from(body.to_string())).unwrap();
    request.extensions_mut().insert(ConnectInfo(test_peer()));
    app.clone().oneshot(request).await.unwrap()
}

async fn get(app: &axum::Router, uri: &str) -> axum::response::Response {
    let mut request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
    request.extensions_mut().insert(ConnectInfo(test_peer()));
    app.clone().oneshot(request).await.unwrap()
}

async fn create_resource(app: &axum::Router, url: &str, name: &str, scan_interval: &str) -> Value {
    let response =
        post(app, "/api/resources", &[], json!({"url": url, "name": name, "scan_interval": scan_interval})).await;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

async fn register_agent(app: &axum::Router, bootstrap_key: &str, agent_id: &str) {
    let response = post(
        app,
        "/agents/checkin",
        &[("X-Api-Key", bootstrap_key)],
        json!({"agent_id": agent_id, "status": "online", "os_info": null}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

/// S1 — HTTP up.
#[tokio::test]
async fn http_up_reaches_stats() {
    let (app, bootstrap_key, _store) = test_app().await;
    let resource = create_resource(&app, "https://httpbin.org/status/200", "httpbin", "30s").await;

    let tasks = json_body(get(&app, "/api/tasks").await).await;
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["monitor_type"], "https");
    let task_id = tasks[0]["id"].as_i64().unwrap();

    register_agent(&app, &bootstrap_key, "eu-west-1").await;

    let submit = post(
        &app,
        "/monitoring/results",
        &[("X-Api-Key", &bootstrap_key)],
        json!([{
            "agent_id": "eu-west-1",
            "task_id": task_id,
            "status": "up",
            "response_time": 123.0,
            "status_code": 200,
            "error_message": null,
            "metadata": null,
            "checked_at": chrono::Utc::now().timestamp(),
        }]),
    )
    .await;
    assert_eq!(submit.status(), StatusCode::ACCEPTED);

    let stats = json_body(get(&app, "/api/stats").await).await;
    assert_eq!(stats["sites_up"], 1);
    assert_eq!(stats["sites_down"], 0);
    let _ = resource;
}

/// S2 — HTTP down.
#[tokio::test]
async fn http_down_reaches_stats() {
    let (app, bootstrap_key, _store) = test_app().await;
    create_resource(&app, "https://httpbin.org/status/503", "flaky", "30s").await;
    let tasks = json_body(get(&app, "/api/tasks").await).await;
    let task_id = tasks[0]["id"].as_i64().unwrap();

    register_agent(&app, &bootstrap_key, "eu-west-1").await;

    let submit = post(
        &app,
        "/monitoring/results",
        &[("X-Api-Key", &bootstrap_key)],
        json!([{
            "agent_id": "eu-west-1",
            "task_id": task_id,
            "status": "down",
            "response_time": null,
            "status_code": 503,
            "error_message": "HTTP 503",
            "metadata": null,
            "checked_at": chrono::Utc::now().timestamp(),
        }]),
    )
    .await;
    assert_eq!(submit.status(), StatusCode::ACCEPTED);

    let stats = json_body(get(&app, "/api/stats").await).await;
    assert_eq!(stats["sites_down"], 1);
    assert_eq!(stats["sites_up"], 0);
}

/// S3 — Ping: monitor_type=ping and the scheme is stripped from the
/// effective task URL.
#[tokio::test]
async fn ping_resource_derives_a_scheme_stripped_task() {
    let (app, _, _store) = test_app().await;
    create_resource(&app, "ping://8.8.8.8", "dns", "60s").await;

    let tasks = json_body(get(&app, "/api/tasks").await).await;
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["monitor_type"], "ping");
    assert_eq!(tasks[0]["url"], "8.8.8.8");
}

/// S4 — Bootstrap upgrade: the upgraded agent reports key_type=permanent,
/// and the bootstrap key this specific agent started with no longer
/// authenticates a second upgrade attempt once this agent holds it.
#[tokio::test]
async fn bootstrap_key_upgrades_to_permanent_and_old_key_is_retired() {
    let (app, bootstrap_key, _store) = test_app().await;
    register_agent(&app, &bootstrap_key, "eu-west-1").await;

    let agents = json_body(get(&app, "/api/agents").await).await;
    let agents = agents.as_array().unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["key_type"], "bootstrap");

    let upgrade =
        post(&app, "/agents/upgrade-key", &[], json!({"agent_id": "eu-west-1", "current_key": bootstrap_key})).await;
    assert_eq!(upgrade.status(), StatusCode::OK);
    let body = json_body(upgrade).await;
    let new_key = body["api_key"].as_str().unwrap().to_string();
    assert_eq!(new_key.len(), 64);
    assert_ne!(new_key, bootstrap_key);

    let agents = json_body(get(&app, "/api/agents").await).await;
    assert_eq!(agents.as_array().unwrap()[0]["key_type"], "permanent");

    // The bootstrap key no longer maps to this agent's row, so a second
    // upgrade attempt presenting it fails.
    let retry =
        post(&app, "/agents/upgrade-key", &[], json!({"agent_id": "eu-west-1", "current_key": bootstrap_key})).await;
    assert_eq!(retry.status(), StatusCode::UNAUTHORIZED);

    // The new permanent key authenticates fine.
    let checkin = post(
        &app,
        "/agents/checkin",
        &[("X-Api-Key", new_key.as_str())],
        json!({"agent_id": "eu-west-1", "status": "online", "os_info": null}),
    )
    .await;
    assert_eq!(checkin.status(), StatusCode::OK);
}

/// S5 — Task revocation shrinks the enabled task list immediately.
#[tokio::test]
async fn deleting_a_resource_removes_its_task() {
    let (app, _, _store) = test_app().await;
    create_resource(&app, "https://a.example.com", "a", "30s").await;
    create_resource(&app, "https://b.example.com", "b", "30s").await;
    let third = create_resource(&app, "https://c.example.com", "c", "30s").await;

    let tasks = json_body(get(&app, "/api/tasks").await).await;
    assert_eq!(tasks.as_array().unwrap().len(), 3);

    let id = third["id"].as_i64().unwrap();
    let delete = app
        .clone()
        .oneshot(Request::builder().method("DELETE").uri(format!("/api/resources/{id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(delete.status(), StatusCode::NO_CONTENT);

    let tasks = json_body(get(&app, "/api/tasks").await).await;
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t["resource_id"].as_i64().unwrap() != id));
}

/// Invariant #1: deleting a Resource deletes its Task and Results.
#[tokio::test]
async fn deleting_a_resource_deletes_its_results_too() {
    let (app, bootstrap_key, store) = test_app().await;
    let resource = create_resource(&app, "https://a.example.com", "a", "30s").await;
    let resource_id = resource["id"].as_i64().unwrap();
    let tasks = json_body(get(&app, "/api/tasks").await).await;
    let task_id = tasks.as_array().unwrap()[0]["id"].as_i64().unwrap();

    register_agent(&app, &bootstrap_key, "eu-west-1").await;
    post(
        &app,
        "/monitoring/results",
        &[("X-Api-Key", &bootstrap_key)],
        json!([{
            "agent_id": "eu-west-1",
            "task_id": task_id,
            "status": "up",
            "response_time": 10.0,
            "status_code": 200,
            "error_message": null,
            "metadata": null,
            "checked_at": chrono::Utc::now().timestamp(),
        }]),
    )
    .await;

    let delete = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/resources/{resource_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete.status(), StatusCode::NO_CONTENT);

    assert!(store.list_resources().await.unwrap().is_empty());
    let since = chrono::Utc::now() - chrono::Duration::hours(1);
    assert!(store.list_joined_results_since(since).await.unwrap().is_empty());
}

/// Unknown API keys are rejected rather than silently auto-registered.
#[tokio::test]
async fn unknown_key_is_unauthorized() {
    let (app, _, _store) = test_app().await;
    let response = post(
        &app,
        "/agents/checkin",
        &[("X-Api-Key", "0000000000000000000000000000000000000000000000000000000000000000")],
        json!({"agent_id": "intruder", "status": "online", "os_info": null}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
