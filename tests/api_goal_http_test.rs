//! API 契约目标集成测试：本地 axum 服务 + 默认 reqwest 传输

use std::net::SocketAddr;
use std::path::Path;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tempfile::TempDir;

use retrai::agent::RunState;
use retrai::goals::{ApiTestGoal, Goal};

async fn spawn_service() -> SocketAddr {
    let app = Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok", "version": 3})) }))
        .route(
            "/users",
            post(|Json(body): Json<serde_json::Value>| async move {
                (StatusCode::CREATED, Json(json!({"id": 1, "name": body["name"]})))
            }),
        )
        .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn write_config(dir: &Path, addr: SocketAddr, extra: &str) {
    let yaml = format!(
        "goal: api-test\nbase_url: http://{}/\nendpoints:\n  - path: /health\n    expect_json:\n      status: ok\n      version: 3\n  - path: /users\n    method: post\n    json: {{name: Alice}}\n    expect_status: 201\n    expect_json: {{name: Alice}}\n{}",
        addr, extra
    );
    std::fs::write(dir.join(".retrai.yml"), yaml).unwrap();
}

#[tokio::test]
async fn test_all_endpoints_pass_against_live_service() {
    let addr = spawn_service().await;
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), addr, "");

    let state = RunState::new("http-run", "mock", dir.path());
    let result = ApiTestGoal::new().check(&state, dir.path()).await;

    assert!(result.achieved, "{}", result.reason);
    assert_eq!(result.reason, "All 2 endpoints passed");
    assert_eq!(result.details["percentage"], 100);
    let rows = result.details["results"].as_array().unwrap();
    assert_eq!(rows[1]["status_code"], 201);
    assert!(rows[0]["elapsed_ms"].is_u64());
}

#[tokio::test]
async fn test_partial_failure_against_live_service() {
    let addr = spawn_service().await;
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), addr, "  - path: /broken\n  - path: /missing\n    expect_status: 200\n");

    let state = RunState::new("http-run", "mock", dir.path());
    let result = ApiTestGoal::new().check(&state, dir.path()).await;

    assert!(!result.achieved);
    assert_eq!(
        result.reason,
        "2/4 endpoints passed. Failures: GET /broken: Expected status 200, got 500; GET /missing: Expected status 200, got 404"
    );
    assert_eq!(result.details["percentage"], 50);
}

#[tokio::test]
async fn test_unreachable_service_is_request_failure() {
    // 绑定后立即释放，得到一个大概率无人监听的端口
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(".retrai.yml"),
        format!("base_url: http://{}\nendpoints:\n  - path: /health\n    timeout: 2\n", addr),
    )
    .unwrap();

    let state = RunState::new("http-run", "mock", dir.path());
    let result = ApiTestGoal::new().check(&state, dir.path()).await;
    assert!(!result.achieved);
    assert!(result.reason.starts_with("0/1 endpoints passed. Failures: GET /health: Request failed: "));
}
