//! 目标协议：把任意领域检查（HTTP 契约、SQL 性能阈值）统一成「达成 / 未达成」判定
//!
//! 普通失败（配置缺失、连接不上、查询报错）一律折叠为 `achieved = false` 的 [`GoalResult`]，
//! `details.error` 标明失败类别；`check` 不 panic、不返回 Err。

pub mod api_test;
pub mod evaluate;
pub mod project_config;
pub mod registry;
pub mod report;
pub mod sql;

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::agent::RunState;

pub use api_test::ApiTestGoal;
pub use evaluate::{evaluate, RunPhase};
pub use registry::{available_goals, get_goal};
pub use sql::SqlBenchmarkGoal;

/// 一次检查的判定结果（不持久化）
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GoalResult {
    pub achieved: bool,
    pub reason: String,
    pub details: Map<String, Value>,
}

impl GoalResult {
    pub fn achieved(reason: impl Into<String>) -> Self {
        Self {
            achieved: true,
            reason: reason.into(),
            details: Map::new(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            achieved: false,
            reason: reason.into(),
            details: Map::new(),
        }
    }

    /// 失败并在 details.error 标注类别
    pub fn failed_with(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::failed(reason).with_detail("error", kind.as_str())
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = details;
        self
    }

    /// details.error 中的失败类别（若有）
    pub fn failure_kind(&self) -> Option<&str> {
        self.details.get("error").and_then(Value::as_str)
    }
}

/// 失败类别，写入 details.error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    MissingConfig,
    InvalidConfig,
    MissingDependency,
    HttpClient,
    Connection,
    FileNotFound,
    Execution,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MissingConfig => "missing_config",
            FailureKind::InvalidConfig => "invalid_config",
            FailureKind::MissingDependency => "missing_dependency",
            FailureKind::HttpClient => "http_client",
            FailureKind::Connection => "connection",
            FailureKind::FileNotFound => "file_not_found",
            FailureKind::Execution => "execution",
        }
    }
}

/// 目标 trait：名称、系统提示词、异步检查
#[async_trait]
pub trait Goal: Send + Sync {
    /// 注册名（如 "api-test"）
    fn name(&self) -> &str;

    /// 注入给 Agent 的系统提示词；可读取项目配置定制
    fn system_prompt(&self, cwd: &Path) -> String;

    /// 检查项目当前是否达成目标
    async fn check(&self, state: &RunState, cwd: &Path) -> GoalResult;
}
