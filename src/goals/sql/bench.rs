//! 基准执行：在阻塞线程里调用同步后端，每次调用都受超时约束
//!
//! 后端以 `Arc<Mutex<Box<dyn SqlBackend>>>` 共享；每个调用 clone 一份句柄带进 `spawn_blocking`。
//! 超时后阻塞任务仍会跑完，但调用方立即拿到 [`BackendError::Timeout`]。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::BackendError;
use crate::goals::sql::backend::{cell_to_string, ColumnInfo, SqlBackend};

/// 结果样本行数
pub const SAMPLE_ROWS: usize = 5;

pub type SharedBackend = Arc<Mutex<Box<dyn SqlBackend>>>;

/// 多次执行同一查询的计时结果
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QueryStats {
    pub elapsed_ms: Vec<f64>,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub sample_rows: Vec<Vec<String>>,
    pub warmup_ms: Option<f64>,
}

/// 执行计划
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExplainReport {
    pub plan_type: String,
    pub plan_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 单表画像
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TableProfile {
    pub table: String,
    pub row_count: Option<u64>,
    pub columns: Vec<ColumnInfo>,
    pub properties: BTreeMap<String, String>,
    pub size_bytes: Option<u64>,
    pub partitions: Vec<String>,
    pub error: Option<String>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn ms_since(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// 绑定一个后端句柄与单次调用超时；release 消费自身后句柄即关闭
pub struct BenchRunner {
    backend: SharedBackend,
    call_timeout: Duration,
}

impl BenchRunner {
    pub fn new(backend: Box<dyn SqlBackend>, call_timeout: Duration) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            call_timeout,
        }
    }

    /// 在阻塞线程中对后端执行 `f`，超时返回 Timeout
    async fn call<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SqlBackend) -> Result<T, BackendError> + Send + 'static,
    {
        let backend = self.backend.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = backend.lock().map_err(|_| BackendError::Poisoned)?;
            f(&mut **guard)
        });
        match tokio::time::timeout(self.call_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(BackendError::Execution(format!("backend task failed: {}", join_err))),
            Err(_) => Err(BackendError::Timeout(self.call_timeout)),
        }
    }

    /// 可选预热一次，再计时执行 `iterations` 次（至少一次）
    pub async fn run_query(&self, query: &str, iterations: u32, warmup: bool) -> Result<QueryStats, String> {
        let mut stats = QueryStats::default();

        if warmup {
            let sql = query.to_string();
            let warmup_ms = self
                .call(move |b| {
                    let started = Instant::now();
                    b.execute(&sql)?;
                    Ok(ms_since(started))
                })
                .await
                .map_err(|e| format!("Warmup failed: {}", e))?;
            stats.warmup_ms = Some(round2(warmup_ms));
        }

        for i in 0..iterations.max(1) {
            let sql = query.to_string();
            let (elapsed, out) = self
                .call(move |b| {
                    let started = Instant::now();
                    let out = b.execute(&sql)?;
                    Ok((ms_since(started), out))
                })
                .await
                .map_err(|e| e.to_string())?;
            tracing::debug!(iteration = i + 1, elapsed_ms = elapsed, rows = out.rows.len(), "query iteration");
            stats.elapsed_ms.push(round2(elapsed));
            stats.row_count = out.rows.len();
            stats.columns = out.columns;
            stats.sample_rows = out
                .rows
                .iter()
                .take(SAMPLE_ROWS)
                .map(|row| row.iter().map(cell_to_string).collect())
                .collect();
        }

        let n = stats.elapsed_ms.len() as f64;
        stats.avg_ms = round2(stats.elapsed_ms.iter().sum::<f64>() / n);
        stats.min_ms = round2(stats.elapsed_ms.iter().copied().fold(f64::INFINITY, f64::min));
        stats.max_ms = round2(stats.elapsed_ms.iter().copied().fold(f64::NEG_INFINITY, f64::max));
        Ok(stats)
    }

    pub async fn explain(&self, query: &str) -> ExplainReport {
        let sql = query.to_string();
        let result = self
            .call(move |b| {
                let plan_type = b.plan_type();
                b.explain(&sql).map(|text| (plan_type, text))
            })
            .await;
        match result {
            Ok((plan_type, plan_text)) => ExplainReport {
                plan_type: plan_type.to_string(),
                plan_text,
                error: None,
            },
            Err(e) => ExplainReport {
                plan_type: "unknown".to_string(),
                plan_text: String::new(),
                error: Some(format!("EXPLAIN failed: {}", e)),
            },
        }
    }

    /// 列信息、属性、行数、大小、分区；只有 describe 失败才记 error
    pub async fn profile_table(&self, table: &str) -> TableProfile {
        let mut profile = TableProfile {
            table: table.to_string(),
            ..Default::default()
        };

        let name = table.to_string();
        match self.call(move |b| b.describe_table(&name)).await {
            Ok((columns, properties)) => {
                profile.columns = columns;
                profile.properties = properties;
            }
            Err(e) => {
                profile.error = Some(format!("DESCRIBE failed: {}", e));
                return profile;
            }
        }

        let name = table.to_string();
        match self.call(move |b| b.row_count(&name)).await {
            Ok(n) => profile.row_count = Some(n),
            Err(e) => tracing::warn!(table, error = %e, "Could not count rows"),
        }

        profile.size_bytes = profile
            .properties
            .get("size")
            .filter(|s| !s.is_empty())
            .or_else(|| profile.properties.get("totalSize"))
            .and_then(|s| s.trim().parse().ok());

        let name = table.to_string();
        match self.call(move |b| b.partitions(&name)).await {
            Ok(parts) => profile.partitions = parts,
            Err(e) => tracing::debug!(table, error = %e, "no partitions"),
        }
        profile
    }

    /// 关闭并在阻塞线程中释放后端；超时或失败只记日志
    pub async fn release(self) {
        let Self { backend, call_timeout } = self;
        let task = tokio::task::spawn_blocking(move || {
            let closed = match backend.lock() {
                Ok(mut guard) => guard.close(),
                Err(_) => Err(BackendError::Poisoned),
            };
            drop(backend);
            closed
        });
        match tokio::time::timeout(call_timeout, task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "failed to close SQL backend"),
            Ok(Err(e)) => tracing::warn!(error = %e, "backend close task failed"),
            Err(_) => tracing::warn!("timed out closing SQL backend"),
        }
    }
}
