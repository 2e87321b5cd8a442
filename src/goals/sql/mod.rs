//! SQL 性能目标：把查询优化到时间预算以内（可选校验返回行数）
//!
//! `.retrai.yml` 示例：
//!
//! ```yaml
//! goal: sql-benchmark
//! dsn: "sqlite:///mydb.sqlite"
//! query_file: query.sql
//! max_ms: 50
//! expected_rows: 42
//! iterations: 3
//! warmup: true
//! explain: true
//! profile_tables: [orders, customers]
//! ```
//!
//! 每次 check 新建后端连接，结束时显式关闭。计时、计划、表画像无论成败都写入 details。

pub mod backend;
pub mod bench;
pub mod sqlite;
pub mod warehouse;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::agent::RunState;
use crate::core::BackendError;
use crate::goals::project_config::{load_project_config, ConfigIssue, ProjectConfig};
use crate::goals::{FailureKind, Goal, GoalResult};

pub use backend::{
    detect_backend, BackendFactory, BackendKind, DefaultBackendFactory, QueryOutput, SqlBackend,
};
pub use bench::{BenchRunner, ExplainReport, QueryStats, TableProfile};

pub const DEFAULT_MAX_MS: f64 = 100.0;
pub const DEFAULT_QUERY: &str = "SELECT 1";
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(300);

/// 从项目配置解析出的查询断言
#[derive(Clone, Debug)]
pub struct QuerySpec {
    pub query: String,
    pub max_ms: f64,
    pub expected_rows: Option<u64>,
    pub iterations: u32,
    pub warmup: bool,
    pub explain: bool,
    pub profile_tables: Vec<String>,
    pub timeout: Duration,
}

impl QuerySpec {
    /// 读取查询文本（query_file 优先）并套用默认值
    pub fn from_config(cfg: &ProjectConfig, cwd: &Path, default_timeout: Duration) -> Result<Self, GoalResult> {
        let query = match cfg.query_file.as_deref().filter(|f| !f.is_empty()) {
            Some(file) => {
                let path = cwd.join(file);
                if !path.exists() {
                    return Err(GoalResult::failed_with(
                        FailureKind::FileNotFound,
                        format!("Query file not found: {}", file),
                    ));
                }
                std::fs::read_to_string(&path).map_err(|e| {
                    GoalResult::failed_with(FailureKind::FileNotFound, format!("Failed to read {}: {}", file, e))
                })?
            }
            None => cfg.query.clone().unwrap_or_else(|| DEFAULT_QUERY.to_string()),
        };
        Ok(Self {
            query,
            max_ms: cfg.max_ms.unwrap_or(DEFAULT_MAX_MS),
            expected_rows: cfg.expected_rows,
            iterations: cfg.iterations.unwrap_or(1).max(1),
            warmup: cfg.warmup,
            explain: cfg.explain,
            profile_tables: cfg.profile_tables.clone(),
            timeout: cfg
                .query_timeout_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
        })
    }
}

/// 连接失败映射到失败类别与原因
fn connect_failure(err: BackendError) -> GoalResult {
    match err {
        BackendError::MissingConfig(msg) => GoalResult::failed_with(FailureKind::MissingConfig, msg),
        e @ BackendError::UnsupportedBackend(_) => GoalResult::failed_with(FailureKind::MissingDependency, e.to_string()),
        BackendError::Connection(msg) => {
            GoalResult::failed_with(FailureKind::Connection, format!("Connection failed: {}", msg))
        }
        other => GoalResult::failed_with(FailureKind::Connection, format!("Connection failed: {}", other)),
    }
}

/// 通过/失败判定，失败原因以 `; ` 连接
pub fn judge(stats: &QueryStats, query_spec: &QuerySpec) -> Result<String, String> {
    let mut failures = Vec::new();
    if stats.avg_ms > query_spec.max_ms {
        failures.push(format!(
            "avg query time {:.1}ms exceeds limit {}ms",
            stats.avg_ms, query_spec.max_ms
        ));
    }
    if let Some(expected) = query_spec.expected_rows {
        if stats.row_count as u64 != expected {
            failures.push(format!("returned {} rows (expected {})", stats.row_count, expected));
        }
    }
    if failures.is_empty() {
        Ok(format!(
            "Query completed in avg {:.1}ms (limit: {}ms), {} rows, {} iteration(s)",
            stats.avg_ms, query_spec.max_ms, stats.row_count, query_spec.iterations
        ))
    } else {
        Err(failures.join("; "))
    }
}

/// SQL 性能目标
pub struct SqlBenchmarkGoal {
    factory: Arc<dyn BackendFactory>,
    default_timeout: Duration,
}

impl Default for SqlBenchmarkGoal {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlBenchmarkGoal {
    pub fn new() -> Self {
        Self {
            factory: Arc::new(DefaultBackendFactory),
            default_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    async fn connect(&self, cfg: &ProjectConfig, cwd: &Path) -> Result<Box<dyn SqlBackend>, BackendError> {
        let factory = self.factory.clone();
        let cfg = cfg.clone();
        let cwd: PathBuf = cwd.to_path_buf();
        let timeout = cfg
            .query_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let task = tokio::task::spawn_blocking(move || factory.connect(&cfg, &cwd));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(BackendError::Connection(e.to_string())),
            Err(_) => Err(BackendError::Timeout(timeout)),
        }
    }
}

#[async_trait]
impl Goal for SqlBenchmarkGoal {
    fn name(&self) -> &str {
        "sql-benchmark"
    }

    fn system_prompt(&self, cwd: &Path) -> String {
        let cfg = load_project_config(cwd).unwrap_or_default();
        let max_ms = cfg.max_ms.unwrap_or(DEFAULT_MAX_MS);
        let qfile = cfg.query_file.as_deref().unwrap_or("the SQL query");

        let mut base = format!(
            "Your goal is to optimise {} so it executes in under {}ms.\n\n\
             You have access to the `sql_bench` tool with three actions:\n\
             - `run_query`: Execute the query and get timing info\n\
             - `explain_query`: Get the execution plan\n\
             - `profile_table`: Get schema, row counts, and properties for any table\n\n\
             Strategy:\n\
             1. Read the current SQL query.\n\
             2. Use `sql_bench(action='explain_query')` to analyze the execution plan.\n\
             3. Identify bottlenecks: full scans, shuffle operations, skew, missing indexes.\n",
            qfile, max_ms
        );

        if cfg.profile_tables.is_empty() {
            base.push_str(
                "4. Propose targeted changes: rewrite the query, add indexes, use CTEs.\n\
                 5. Write the improved query back to the file.\n\
                 6. Re-run `sql_bench(action='run_query')` to verify improvement.\n",
            );
        } else {
            base.push_str(&format!(
                "4. Profile related tables ({}) to understand data distribution.\n\
                 5. Propose targeted changes: rewrite the query, add indexes, use CTEs.\n\
                 6. Write the improved query back to the file.\n\
                 7. Re-run `sql_bench(action='run_query')` to verify improvement.\n",
                cfg.profile_tables.join(", ")
            ));
        }

        if detect_backend(&cfg) == BackendKind::Warehouse {
            base.push_str(
                "\nDatabricks-specific optimizations:\n\
                 - Use Delta table features: Z-ORDER BY, OPTIMIZE, liquid clustering.\n\
                 - Leverage partition pruning by filtering on partition columns.\n\
                 - Prefer broadcast joins for small dimension tables.\n\
                 - Consider Photon engine capabilities for scan-heavy queries.\n\
                 - Check for data skew in join keys.\n\
                 - Use ANALYZE TABLE to update statistics.\n",
            );
        }

        base.push_str(
            "\nRules:\n\
             - Do NOT change the expected result set (same rows, same columns).\n\
             - You may create indexes (DDL) if needed.\n\
             - Prefer query rewrites over schema changes.\n",
        );

        match cfg.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(custom) => format!("{}\n\n{}", custom, base).trim().to_string(),
            None => base,
        }
    }

    async fn check(&self, _state: &RunState, cwd: &Path) -> GoalResult {
        let cfg = match load_project_config(cwd) {
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

        let backend = match self.connect(&cfg, cwd).await {
            Ok(b) => b,
            Err(e) => return connect_failure(e),
        };
        let kind = backend.kind();
        let query_spec = match QuerySpec::from_config(&cfg, cwd, self.default_timeout) {
            Ok(s) => s,
            Err(result) => {
                BenchRunner::new(backend, self.default_timeout).release().await;
                return result;
            }
        };
        let runner = BenchRunner::new(backend, query_spec.timeout);

        let stats = match runner.run_query(&query_spec.query, query_spec.iterations, query_spec.warmup).await {
            Ok(s) => s,
            Err(e) => {
                runner.release().await;
                return GoalResult::failed_with(FailureKind::Execution, format!("Query execution failed: {}", e))
                    .with_detail("message", e);
            }
        };

        let mut details = Map::new();
        details.insert("backend".into(), kind.label().into());
        details.insert("limit_ms".into(), query_spec.max_ms.into());
        details.insert("elapsed_ms".into(), stats.elapsed_ms.clone().into());
        details.insert("avg_ms".into(), stats.avg_ms.into());
        details.insert("min_ms".into(), stats.min_ms.into());
        details.insert("max_ms".into(), stats.max_ms.into());
        details.insert("row_count".into(), stats.row_count.into());
        details.insert("columns".into(), stats.columns.clone().into());
        details.insert(
            "sample_rows".into(),
            serde_json::to_value(&stats.sample_rows).unwrap_or(Value::Null),
        );
        details.insert("iterations".into(), query_spec.iterations.into());
        if let Some(w) = stats.warmup_ms {
            details.insert("warmup_ms".into(), w.into());
        }

        if query_spec.explain {
            let report = runner.explain(&query_spec.query).await;
            details.insert("explain".into(), serde_json::to_value(&report).unwrap_or(Value::Null));
        }

        if !query_spec.profile_tables.is_empty() {
            let mut profiles = Vec::with_capacity(query_spec.profile_tables.len());
            for table in &query_spec.profile_tables {
                profiles.push(runner.profile_table(table).await);
            }
            details.insert(
                "table_profiles".into(),
                serde_json::to_value(&profiles).unwrap_or(Value::Null),
            );
        }

        runner.release().await;

        tracing::info!(
            avg_ms = stats.avg_ms,
            rows = stats.row_count,
            limit_ms = query_spec.max_ms,
            "sql-benchmark check finished"
        );
        match judge(&stats, &query_spec) {
            Ok(reason) => GoalResult::achieved(reason).with_details(details),
            Err(reason) => GoalResult::failed(reason).with_details(details),
        }
    }
}
