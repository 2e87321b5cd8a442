//! API 契约目标：对配置的 base_url 逐个请求端点，核对状态码与可选的 JSON 字段
//!
//! `.retrai.yml` 示例：
//!
//! ```yaml
//! goal: api-test
//! base_url: http://localhost:8000
//! endpoints:
//!   - path: /health
//!     expect_json: {status: ok}
//!   - path: /users
//!     method: POST
//!     json: {name: Alice}
//!     expect_status: 201
//! ```
//!
//! 端点按声明顺序串行请求，单个端点的超时或连接失败只记为该行失败。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::agent::RunState;
use crate::goals::project_config::{load_project_config, ConfigIssue, EndpointConfig};
use crate::goals::report::{failure_summary, CheckRow, Tally, MAX_LISTED_FAILURES};
use crate::goals::{FailureKind, Goal, GoalResult};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// 解析后的端点断言
#[derive(Clone, Debug)]
pub struct EndpointSpec {
    pub path: String,
    pub method: String,
    pub json_body: Option<Value>,
    pub headers: BTreeMap<String, String>,
    pub expect_status: u16,
    pub expect_json: Option<Map<String, Value>>,
    pub timeout: Duration,
}

impl EndpointSpec {
    fn from_config(raw: EndpointConfig, default_timeout: Duration) -> Self {
        let timeout = raw
            .timeout
            .filter(|t| *t > 0.0)
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
            .unwrap_or(default_timeout);
        Self {
            path: raw.path,
            method: raw.method.to_uppercase(),
            json_body: raw.json,
            headers: raw.headers,
            expect_status: raw.expect_status,
            expect_json: raw.expect_json,
            timeout,
        }
    }
}

/// 发往传输层的请求
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub json: Option<Value>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// 传输层返回的响应（仅保留判定需要的部分）
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP 传输抽象；默认实现基于 reqwest，测试可替换
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, String>;
}

/// 基于 reqwest::Client 的传输
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, String> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|e| e.to_string())?;
        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (k, v) in &request.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }
        let resp = builder.send().await.map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse { status, body })
    }
}

/// API 契约目标
pub struct ApiTestGoal {
    transport: Option<Arc<dyn HttpTransport>>,
    default_timeout: Duration,
}

impl Default for ApiTestGoal {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiTestGoal {
    pub fn new() -> Self {
        Self {
            transport: None,
            default_timeout: DEFAULT_ENDPOINT_TIMEOUT,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn transport(&self) -> Result<Arc<dyn HttpTransport>, String> {
        match &self.transport {
            Some(t) => Ok(t.clone()),
            None => ReqwestTransport::new()
                .map(|t| Arc::new(t) as Arc<dyn HttpTransport>)
                .map_err(|e| e.to_string()),
        }
    }

    async fn test_endpoint(&self, transport: &dyn HttpTransport, base_url: &str, ep: &EndpointSpec) -> CheckRow {
        if !SUPPORTED_METHODS.contains(&ep.method.as_str()) {
            return CheckRow::fail(
                &ep.path,
                &ep.method,
                format!("Unsupported HTTP method: {}", ep.method),
                None,
                None,
            );
        }

        let request = HttpRequest {
            method: ep.method.clone(),
            url: format!("{}{}", base_url, ep.path),
            json: ep.json_body.clone(),
            headers: ep.headers.clone(),
            timeout: ep.timeout,
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(ep.timeout, transport.send(&request)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                return CheckRow::fail(&ep.path, &ep.method, format!("Request failed: {}", e), None, Some(elapsed_ms));
            }
            Err(_) => {
                return CheckRow::fail(
                    &ep.path,
                    &ep.method,
                    format!("Request failed: timed out after {}s", ep.timeout.as_secs_f64()),
                    None,
                    Some(elapsed_ms),
                );
            }
        };

        if response.status != ep.expect_status {
            return CheckRow::fail(
                &ep.path,
                &ep.method,
                format!("Expected status {}, got {}", ep.expect_status, response.status),
                Some(response.status),
                Some(elapsed_ms),
            );
        }

        if let Some(expected) = ep.expect_json.as_ref().filter(|m| !m.is_empty()) {
            let body: Value = match serde_json::from_str(&response.body) {
                Ok(v) => v,
                Err(_) => {
                    return CheckRow::fail(
                        &ep.path,
                        &ep.method,
                        "Response is not valid JSON",
                        Some(response.status),
                        Some(elapsed_ms),
                    );
                }
            };
            for (key, want) in expected {
                let got = body.as_object().and_then(|o| o.get(key)).unwrap_or(&Value::Null);
                if !json_eq(want, got) {
                    return CheckRow::fail(
                        &ep.path,
                        &ep.method,
                        format!("JSON field '{}': expected {}, got {}", key, want, got),
                        Some(response.status),
                        Some(elapsed_ms),
                    );
                }
            }
        }

        tracing::debug!(method = %ep.method, path = %ep.path, elapsed_ms, "endpoint passed");
        CheckRow::pass(&ep.path, &ep.method, response.status, elapsed_ms)
    }
}

/// 数值按值比较（1 与 1.0 相等），其余按结构比较
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

#[async_trait]
impl Goal for ApiTestGoal {
    fn name(&self) -> &str {
        "api-test"
    }

    fn system_prompt(&self, _cwd: &Path) -> String {
        "You are an API integration testing agent.\n\n\
         Your goal is to ensure that ALL configured HTTP endpoints return\n\
         the expected status codes and response bodies.\n\n\
         Strategy:\n\
         1. Inspect the running service (logs, process list).\n\
         2. If the service is not running, attempt to start it.\n\
         3. Test individual endpoints with curl or a small script.\n\
         4. Fix any issues you find in the service code.\n\
         5. Repeat until all endpoints pass.\n\n\
         If a service won't start, diagnose why and fix it."
            .to_string()
    }

    async fn check(&self, _state: &RunState, cwd: &Path) -> GoalResult {
        let config = match load_project_config(cwd) {
            Ok(c) => c,
            Err(ConfigIssue::Missing(_)) => {
                return GoalResult::failed_with(FailureKind::MissingConfig, "No .retrai.yml found");
            }
            Err(ConfigIssue::Unreadable(e)) => {
                return GoalResult::failed_with(
                    FailureKind::InvalidConfig,
                    format!("Failed to read .retrai.yml: {}", e),
                );
            }
        };

        if config.endpoints.is_empty() {
            return GoalResult::failed_with(FailureKind::MissingConfig, "No endpoints configured in .retrai.yml");
        }

        let transport = match self.transport() {
            Ok(t) => t,
            Err(e) => {
                return GoalResult::failed_with(FailureKind::HttpClient, format!("HTTP client unavailable: {}", e));
            }
        };

        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let endpoints: Vec<EndpointSpec> = config
            .endpoints
            .into_iter()
            .map(|raw| EndpointSpec::from_config(raw, self.default_timeout))
            .collect();

        let mut rows = Vec::with_capacity(endpoints.len());
        for ep in &endpoints {
            rows.push(self.test_endpoint(transport.as_ref(), &base_url, ep).await);
        }

        let tally = Tally::of(&rows);
        let results = serde_json::to_value(&rows).unwrap_or(Value::Array(Vec::new()));
        tracing::info!(passed = tally.passed, total = tally.total, "api-test check finished");

        if tally.all_passed() {
            GoalResult::achieved(format!("All {} endpoints passed", tally.total))
                .with_detail("percentage", 100)
                .with_detail("results", results)
        } else {
            GoalResult::failed(format!(
                "{}/{} endpoints passed. Failures: {}",
                tally.passed,
                tally.total,
                failure_summary(&rows, MAX_LISTED_FAILURES)
            ))
            .with_detail("percentage", tally.percentage())
            .with_detail("results", results)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// 按 "METHOD url" 返回固定响应；未登记的 URL 视为连接失败
    #[derive(Default)]
    struct ScriptedTransport {
        routes: BTreeMap<String, HttpResponse>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn route(mut self, method: &str, url: &str, status: u16, body: &str) -> Self {
            self.routes.insert(
                format!("{} {}", method, url),
                HttpResponse {
                    status,
                    body: body.to_string(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, String> {
            let key = format!("{} {}", request.method, request.url);
            self.seen.lock().unwrap().push(key.clone());
            self.routes
                .get(&key)
                .cloned()
                .ok_or_else(|| "ConnectError: connection refused".to_string())
        }
    }

    struct SlowTransport;

    #[async_trait]
    impl HttpTransport for SlowTransport {
        async fn send(&self, _request: &HttpRequest) -> Result<HttpResponse, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(HttpResponse {
                status: 200,
                body: String::new(),
            })
        }
    }

    fn project(yaml: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".retrai.yml"), yaml).unwrap();
        dir
    }

    fn state() -> RunState {
        RunState::new("api-run", "mock", ".")
    }

    #[tokio::test]
    async fn test_no_config_file() {
        let dir = TempDir::new().unwrap();
        let r = ApiTestGoal::new().check(&state(), dir.path()).await;
        assert!(!r.achieved);
        assert_eq!(r.reason, "No .retrai.yml found");
    }

    #[tokio::test]
    async fn test_unreadable_config() {
        let dir = project("endpoints: [oops");
        let r = ApiTestGoal::new().check(&state(), dir.path()).await;
        assert!(r.reason.starts_with("Failed to read .retrai.yml:"));
        assert_eq!(r.failure_kind(), Some("invalid_config"));
    }

    #[tokio::test]
    async fn test_no_endpoints() {
        let dir = project("base_url: http://x\n");
        let r = ApiTestGoal::new().check(&state(), dir.path()).await;
        assert_eq!(r.reason, "No endpoints configured in .retrai.yml");
    }

    #[tokio::test]
    async fn test_one_of_two_passes() {
        let dir = project(
            "base_url: http://svc/\nendpoints:\n  - path: /health\n    expect_json: {status: ok}\n  - path: /users\n    method: post\n    json: {name: Alice}\n    expect_status: 201\n",
        );
        let transport = Arc::new(
            ScriptedTransport::default()
                .route("GET", "http://svc/health", 200, r#"{"status":"ok"}"#)
                .route("POST", "http://svc/users", 500, "boom"),
        );
        let goal = ApiTestGoal::new().with_transport(transport.clone());
        let r = goal.check(&state(), dir.path()).await;

        assert!(!r.achieved);
        assert!(r.reason.starts_with("1/2 endpoints passed. Failures: "));
        assert!(r.reason.contains("POST /users: Expected status 201, got 500"));
        assert_eq!(r.details["percentage"], 50);
        let results = r.details["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["path"], "/health");
        assert_eq!(results[0]["passed"], true);
        assert_eq!(results[1]["status_code"], 500);
        assert_eq!(
            *transport.seen.lock().unwrap(),
            vec!["GET http://svc/health".to_string(), "POST http://svc/users".to_string()]
        );
    }

    #[tokio::test]
    async fn test_all_pass() {
        let dir = project("base_url: http://svc\nendpoints:\n  - path: /a\n  - path: /b\n");
        let transport = Arc::new(
            ScriptedTransport::default()
                .route("GET", "http://svc/a", 200, "")
                .route("GET", "http://svc/b", 200, ""),
        );
        let r = ApiTestGoal::new().with_transport(transport).check(&state(), dir.path()).await;
        assert!(r.achieved);
        assert_eq!(r.reason, "All 2 endpoints passed");
        assert_eq!(r.details["percentage"], 100);
    }

    #[tokio::test]
    async fn test_json_field_mismatch_and_invalid_json() {
        let dir = project(
            "base_url: http://svc\nendpoints:\n  - path: /a\n    expect_json: {status: ok}\n  - path: /b\n    expect_json: {count: 1}\n  - path: /c\n    expect_json: {count: 1}\n",
        );
        let transport = Arc::new(
            ScriptedTransport::default()
                .route("GET", "http://svc/a", 200, r#"{"status":"down"}"#)
                .route("GET", "http://svc/b", 200, "<html>")
                .route("GET", "http://svc/c", 200, r#"{"count": 1.0}"#),
        );
        let r = ApiTestGoal::new().with_transport(transport).check(&state(), dir.path()).await;
        let results = r.details["results"].as_array().unwrap();
        assert_eq!(results[0]["reason"], r#"JSON field 'status': expected "ok", got "down""#);
        assert_eq!(results[1]["reason"], "Response is not valid JSON");
        assert_eq!(results[2]["passed"], true);
        assert!(r.reason.starts_with("1/3 endpoints passed"));
    }

    #[tokio::test]
    async fn test_unsupported_method_and_connection_failure() {
        let dir = project("base_url: http://svc\nendpoints:\n  - path: /a\n    method: brew\n  - path: /down\n");
        let transport = Arc::new(ScriptedTransport::default());
        let r = ApiTestGoal::new().with_transport(transport.clone()).check(&state(), dir.path()).await;
        let results = r.details["results"].as_array().unwrap();
        assert_eq!(results[0]["reason"], "Unsupported HTTP method: BREW");
        assert!(results[0]["elapsed_ms"].is_null());
        assert!(results[1]["reason"].as_str().unwrap().starts_with("Request failed: "));
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_failed_row() {
        let dir = project("base_url: http://svc\nendpoints:\n  - path: /slow\n    timeout: 0.05\n");
        let r = ApiTestGoal::new()
            .with_transport(Arc::new(SlowTransport))
            .check(&state(), dir.path())
            .await;
        assert!(!r.achieved);
        let results = r.details["results"].as_array().unwrap();
        assert!(results[0]["reason"].as_str().unwrap().contains("timed out"));
    }
}
