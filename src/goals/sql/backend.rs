//! SQL 后端抽象：同步驱动接口 + 后端类型探测 + 连接工厂
//!
//! 驱动调用都是阻塞的，由 [`super::bench::BenchRunner`] 放进 `spawn_blocking` 执行。

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::core::BackendError;
use crate::goals::project_config::ProjectConfig;
use crate::goals::sql::sqlite::SqliteBackend;
use crate::goals::sql::warehouse::{WarehouseBackend, WarehouseSettings};

/// 后端类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// 连接串（DSN）后端，内置 SQLite
    ConnectionString,
    /// 数据仓库后端（Databricks SQL Warehouse）
    Warehouse,
}

impl BackendKind {
    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::ConnectionString => "sqlalchemy",
            BackendKind::Warehouse => "databricks",
        }
    }
}

/// 按配置形状探测后端：显式 backend > databricks:// DSN > server_hostname/http_path > 连接串
pub fn detect_backend(cfg: &ProjectConfig) -> BackendKind {
    if let Some(explicit) = cfg.backend.as_deref() {
        match explicit.trim().to_lowercase().as_str() {
            "databricks" | "warehouse" => return BackendKind::Warehouse,
            "sqlalchemy" | "sqlite" | "dsn" => return BackendKind::ConnectionString,
            _ => {}
        }
    }
    if cfg.dsn.as_deref().is_some_and(|d| d.starts_with("databricks://")) {
        return BackendKind::Warehouse;
    }
    let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
    if has(&cfg.server_hostname) || has(&cfg.http_path) {
        return BackendKind::Warehouse;
    }
    BackendKind::ConnectionString
}

/// 一次查询的结果集
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// 列描述：name / type 以及后端特有的附加键
pub type ColumnInfo = BTreeMap<String, String>;

/// 同步 SQL 后端
pub trait SqlBackend: Send {
    fn kind(&self) -> BackendKind;

    fn execute(&mut self, sql: &str) -> Result<QueryOutput, BackendError>;

    /// 执行计划文本，每行一条，列之间以 ` | ` 分隔
    fn explain(&mut self, sql: &str) -> Result<String, BackendError>;

    /// 计划类型标签（sqlite_plan / extended）
    fn plan_type(&self) -> &'static str;

    /// 列信息与表属性
    fn describe_table(&mut self, table: &str) -> Result<(Vec<ColumnInfo>, BTreeMap<String, String>), BackendError>;

    fn row_count(&mut self, table: &str) -> Result<u64, BackendError> {
        let out = self.execute(&format!("SELECT COUNT(*) FROM {}", table))?;
        Ok(out
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(value_as_u64)
            .unwrap_or(0))
    }

    /// 分区列表；不支持分区的后端返回空
    fn partitions(&mut self, _table: &str) -> Result<Vec<String>, BackendError> {
        Ok(Vec::new())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// 数字或数字字符串转 u64（仓库后端的结果全是字符串）
pub fn value_as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 单元格转文本：字符串原样，NULL 为 "NULL"，其余为 JSON 文本
pub fn cell_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// 连接工厂：每次 check 新建一个后端，在阻塞线程中调用
pub trait BackendFactory: Send + Sync {
    fn connect(&self, cfg: &ProjectConfig, cwd: &Path) -> Result<Box<dyn SqlBackend>, BackendError>;
}

/// 默认工厂：SQLite（rusqlite）与 Databricks SQL Warehouse（REST）
#[derive(Debug, Default, Clone)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn connect(&self, cfg: &ProjectConfig, cwd: &Path) -> Result<Box<dyn SqlBackend>, BackendError> {
        match detect_backend(cfg) {
            BackendKind::Warehouse => {
                let settings = WarehouseSettings::from_config(cfg)?;
                Ok(Box::new(WarehouseBackend::connect(settings)?))
            }
            BackendKind::ConnectionString => {
                let dsn = cfg
                    .dsn
                    .as_deref()
                    .filter(|d| !d.trim().is_empty())
                    .ok_or_else(|| {
                        BackendError::MissingConfig(
                            "No 'dsn' configured for the connection-string backend in .retrai.yml".to_string(),
                        )
                    })?;
                Ok(Box::new(SqliteBackend::open_dsn(dsn, cwd)?))
            }
        }
    }
}
