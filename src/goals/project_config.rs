//! 项目配置 `.retrai.yml`：每次 check 时重新读取
//!
//! 空文件或只有注释视为全默认；YAML 语法错误或字段类型不符返回 [`ConfigIssue::Unreadable`]。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

pub const PROJECT_CONFIG_FILE: &str = ".retrai.yml";

/// `.retrai.yml` 顶层；API 与 SQL 目标共用一个文件，各取所需字段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub goal: Option<String>,
    /// 追加在内置提示词前的自定义提示词
    pub system_prompt: Option<String>,

    // ---- api-test ----
    pub base_url: Option<String>,
    pub endpoints: Vec<EndpointConfig>,

    // ---- sql-benchmark ----
    pub backend: Option<String>,
    pub dsn: Option<String>,
    pub server_hostname: Option<String>,
    pub http_path: Option<String>,
    pub warehouse_id: Option<String>,
    pub token: Option<String>,
    pub query_file: Option<String>,
    pub query: Option<String>,
    pub max_ms: Option<f64>,
    pub expected_rows: Option<u64>,
    pub iterations: Option<u32>,
    pub warmup: bool,
    pub explain: bool,
    pub profile_tables: Vec<String>,
    pub query_timeout_secs: Option<u64>,
}

/// 单个端点的原始配置
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub json: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_expect_status")]
    pub expect_status: u16,
    #[serde(default)]
    pub expect_json: Option<Map<String, Value>>,
    /// 秒；未设置时用目标的默认超时
    #[serde(default)]
    pub timeout: Option<f64>,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_expect_status() -> u16 {
    200
}

/// 读取项目配置失败的两种情况
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    Missing(PathBuf),
    Unreadable(String),
}

pub fn project_config_path(cwd: &Path) -> PathBuf {
    cwd.join(PROJECT_CONFIG_FILE)
}

/// 读取并解析 `<cwd>/.retrai.yml`
pub fn load_project_config(cwd: &Path) -> Result<ProjectConfig, ConfigIssue> {
    let path = project_config_path(cwd);
    if !path.exists() {
        return Err(ConfigIssue::Missing(path));
    }
    let text = std::fs::read_to_string(&path).map_err(|e| ConfigIssue::Unreadable(e.to_string()))?;
    parse_project_config(&text)
}

pub fn parse_project_config(text: &str) -> Result<ProjectConfig, ConfigIssue> {
    let raw: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| ConfigIssue::Unreadable(e.to_string()))?;
    if raw.is_null() {
        return Ok(ProjectConfig::default());
    }
    serde_yaml::from_value(raw).map_err(|e| ConfigIssue::Unreadable(e.to_string()))
}
