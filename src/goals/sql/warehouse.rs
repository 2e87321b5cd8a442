//! 数据仓库后端：Databricks SQL Statement Execution API（`/api/2.0/sql/statements`）
//!
//! 使用 reqwest::blocking；实例只能在阻塞线程中创建、使用和释放。
//! 结果以 JSON_ARRAY + INLINE 方式取回，单元格全是字符串或 null。

use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::BackendError;
use crate::goals::project_config::ProjectConfig;
use crate::goals::sql::backend::{cell_to_string, BackendKind, ColumnInfo, QueryOutput, SqlBackend};

const STATEMENTS_PATH: &str = "/api/2.0/sql/statements";
const MAX_PARTITIONS: usize = 50;

/// 连接参数
#[derive(Clone, Debug)]
pub struct WarehouseSettings {
    /// `https`（默认）或配置里显式给出的 `http`
    pub scheme: String,
    /// 不含 scheme 的主机名（可带端口）
    pub host: String,
    pub warehouse_id: String,
    pub token: Option<String>,
    pub poll_interval: Duration,
    /// 单条语句的最长等待（含轮询）
    pub statement_timeout: Duration,
}

impl WarehouseSettings {
    /// 从项目配置读取，缺失项回退到环境变量 DATABRICKS_HOST / DATABRICKS_HTTP_PATH / DATABRICKS_TOKEN
    pub fn from_config(cfg: &ProjectConfig) -> Result<Self, BackendError> {
        let (dsn_host, dsn_path) = cfg
            .dsn
            .as_deref()
            .and_then(|d| d.strip_prefix("databricks://"))
            .map(split_dsn)
            .unwrap_or_default();

        let (scheme, host) = non_empty(cfg.server_hostname.clone())
            .or(dsn_host)
            .or_else(|| env_var("DATABRICKS_HOST"))
            .map(|h| split_scheme(&h))
            .filter(|(_, h)| !h.is_empty())
            .ok_or_else(|| {
                BackendError::MissingConfig(
                    "No 'server_hostname' configured for the Databricks backend (or DATABRICKS_HOST)".to_string(),
                )
            })?;

        let http_path = non_empty(cfg.http_path.clone())
            .or(dsn_path)
            .or_else(|| env_var("DATABRICKS_HTTP_PATH"));
        let warehouse_id = non_empty(cfg.warehouse_id.clone())
            .or_else(|| http_path.as_deref().and_then(warehouse_from_http_path))
            .ok_or_else(|| {
                BackendError::MissingConfig(
                    "No 'http_path' or 'warehouse_id' configured for the Databricks backend (or DATABRICKS_HTTP_PATH)"
                        .to_string(),
                )
            })?;

        Ok(Self {
            scheme,
            host,
            warehouse_id,
            token: non_empty(cfg.token.clone()).or_else(|| env_var("DATABRICKS_TOKEN")),
            poll_interval: Duration::from_millis(500),
            statement_timeout: Duration::from_secs(cfg.query_timeout_secs.unwrap_or(300)),
        })
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn env_var(key: &str) -> Option<String> {
    non_empty(std::env::var(key).ok())
}

/// `http://h/` → ("http", "h")；无 scheme 时按 https
fn split_scheme(host: &str) -> (String, String) {
    let h = host.trim();
    let (scheme, rest) = match h.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") => ("http", rest),
        Some((_, rest)) => ("https", rest),
        None => ("https", h),
    };
    (scheme.to_string(), rest.trim_end_matches('/').to_string())
}

/// `databricks://[token:xxx@]host[/http/path]` → (host, http_path)
fn split_dsn(rest: &str) -> (Option<String>, Option<String>) {
    let rest = rest.rsplit_once('@').map(|(_, r)| r).unwrap_or(rest);
    let rest = rest.split('?').next().unwrap_or_default();
    match rest.split_once('/') {
        Some((host, path)) => (non_empty(Some(host.to_string())), non_empty(Some(format!("/{}", path)))),
        None => (non_empty(Some(rest.to_string())), None),
    }
}

/// `/sql/1.0/warehouses/<id>` → `<id>`
pub fn warehouse_from_http_path(http_path: &str) -> Option<String> {
    http_path
        .trim_end_matches('/')
        .rsplit_once("/warehouses/")
        .map(|(_, id)| id.to_string())
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    #[serde(default)]
    statement_id: String,
    #[serde(default)]
    status: StatementStatus,
    #[serde(default)]
    manifest: Option<Manifest>,
    #[serde(default)]
    result: Option<ResultChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct StatementStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error: Option<StatementErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StatementErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    schema: Option<Schema>,
}

#[derive(Debug, Deserialize)]
struct Schema {
    #[serde(default)]
    columns: Vec<ColumnDesc>,
}

#[derive(Debug, Deserialize)]
struct ColumnDesc {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResultChunk {
    #[serde(default)]
    data_array: Vec<Vec<Value>>,
    #[serde(default)]
    next_chunk_internal_link: Option<String>,
}

pub struct WarehouseBackend {
    settings: WarehouseSettings,
    client: reqwest::blocking::Client,
}

impl WarehouseBackend {
    pub fn connect(settings: WarehouseSettings) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        tracing::debug!(host = %settings.host, warehouse = %settings.warehouse_id, "warehouse backend ready");
        Ok(Self { settings, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}://{}{}", self.settings.scheme, self.settings.host, path)
    }

    fn authed(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.settings.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn read<T: for<'de> Deserialize<'de>>(resp: reqwest::blocking::Response) -> Result<T, BackendError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(BackendError::Execution(format!("HTTP {}: {}", status.as_u16(), body.trim())));
        }
        resp.json::<T>()
            .map_err(|e| BackendError::Execution(format!("invalid response: {}", e)))
    }

    fn submit(&self, sql: &str) -> Result<StatementResponse, BackendError> {
        let body = json!({
            "statement": sql,
            "warehouse_id": self.settings.warehouse_id,
            "wait_timeout": "30s",
            "on_wait_timeout": "CONTINUE",
            "format": "JSON_ARRAY",
            "disposition": "INLINE",
        });
        let resp = self
            .authed(self.client.post(self.url(STATEMENTS_PATH)).json(&body))
            .send()
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Self::read(resp)
    }

    fn poll(&self, statement_id: &str) -> Result<StatementResponse, BackendError> {
        let url = self.url(&format!("{}/{}", STATEMENTS_PATH, statement_id));
        let resp = self
            .authed(self.client.get(url))
            .send()
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Self::read(resp)
    }

    fn fetch_chunk(&self, link: &str) -> Result<ResultChunk, BackendError> {
        let resp = self
            .authed(self.client.get(self.url(link)))
            .send()
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Self::read(resp)
    }

    /// 提交语句并等待终态，再拉取所有分块
    fn run_statement(&self, sql: &str) -> Result<QueryOutput, BackendError> {
        let started = Instant::now();
        let mut resp = self.submit(sql)?;
        while matches!(resp.status.state.as_str(), "PENDING" | "RUNNING") {
            if started.elapsed() >= self.settings.statement_timeout {
                return Err(BackendError::Timeout(self.settings.statement_timeout));
            }
            thread::sleep(self.settings.poll_interval);
            resp = self.poll(&resp.statement_id)?;
        }

        if resp.status.state != "SUCCEEDED" {
            let message = resp
                .status
                .error
                .map(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("statement ended in state {}", resp.status.state));
            return Err(BackendError::Execution(message));
        }

        let columns = resp
            .manifest
            .and_then(|m| m.schema)
            .map(|s| s.columns.into_iter().map(|c| c.name).collect())
            .unwrap_or_default();
        let mut chunk = resp.result.unwrap_or_default();
        let mut rows = std::mem::take(&mut chunk.data_array);
        while let Some(link) = chunk.next_chunk_internal_link.take() {
            chunk = self.fetch_chunk(&link)?;
            rows.append(&mut chunk.data_array);
        }
        Ok(QueryOutput { columns, rows })
    }
}

fn cell(row: &[Value], i: usize) -> String {
    row.get(i).map(cell_to_string).unwrap_or_default()
}

/// 解析 DESCRIBE EXTENDED：空行或 `#` 开头的行之后是表属性
pub(crate) fn parse_describe_extended(rows: &[Vec<Value>]) -> (Vec<ColumnInfo>, BTreeMap<String, String>) {
    let mut columns = Vec::new();
    let mut properties = BTreeMap::new();
    let mut in_props = false;
    for row in rows {
        let name = row
            .first()
            .filter(|v| !v.is_null())
            .map(|v| cell_to_string(v).trim().to_string())
            .unwrap_or_default();
        if name.is_empty() || name.starts_with('#') {
            in_props = true;
            continue;
        }
        let second = row.get(1).filter(|v| !v.is_null()).map(|_| cell(row, 1).trim().to_string());
        if in_props {
            properties.insert(name, second.unwrap_or_default());
        } else {
            let mut info = ColumnInfo::new();
            info.insert("name".to_string(), name);
            info.insert("type".to_string(), second.unwrap_or_else(|| "unknown".to_string()));
            let comment = row
                .get(2)
                .filter(|v| !v.is_null())
                .map(|_| cell(row, 2).trim().to_string())
                .unwrap_or_default();
            info.insert("comment".to_string(), comment);
            columns.push(info);
        }
    }
    (columns, properties)
}

impl SqlBackend for WarehouseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Warehouse
    }

    fn execute(&mut self, sql: &str) -> Result<QueryOutput, BackendError> {
        self.run_statement(sql)
    }

    fn explain(&mut self, sql: &str) -> Result<String, BackendError> {
        let out = self.run_statement(&format!("EXPLAIN EXTENDED {}", sql))?;
        Ok(out
            .rows
            .iter()
            .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>().join(" | "))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn plan_type(&self) -> &'static str {
        "extended"
    }

    fn describe_table(&mut self, table: &str) -> Result<(Vec<ColumnInfo>, BTreeMap<String, String>), BackendError> {
        let described = self.run_statement(&format!("DESCRIBE EXTENDED {}", table))?;
        let (columns, mut properties) = parse_describe_extended(&described.rows);

        // 并非所有表都支持 SHOW TBLPROPERTIES
        match self.run_statement(&format!("SHOW TBLPROPERTIES {}", table)) {
            Ok(props) => {
                for row in props.rows.iter().filter(|r| r.len() >= 2) {
                    properties.insert(cell(row, 0), cell(row, 1));
                }
            }
            Err(e) => tracing::debug!(table, error = %e, "SHOW TBLPROPERTIES unavailable"),
        }
        Ok((columns, properties))
    }

    fn partitions(&mut self, table: &str) -> Result<Vec<String>, BackendError> {
        let out = self.run_statement(&format!("SHOW PARTITIONS {}", table))?;
        Ok(out.rows.iter().take(MAX_PARTITIONS).map(|row| cell(row, 0)).collect())
    }
}
