//! 逐项检查结果的汇总：通过数、百分比、前 N 条失败摘要

use serde::Serialize;

/// 失败摘要中最多列出的条数
pub const MAX_LISTED_FAILURES: usize = 5;

/// 单个端点的检查结果（写入 details.results）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckRow {
    pub path: String,
    pub method: String,
    pub passed: bool,
    pub reason: String,
    pub status_code: Option<u16>,
    pub elapsed_ms: Option<u64>,
}

impl CheckRow {
    pub fn pass(path: &str, method: &str, status_code: u16, elapsed_ms: u64) -> Self {
        Self {
            path: path.to_string(),
            method: method.to_string(),
            passed: true,
            reason: "ok".to_string(),
            status_code: Some(status_code),
            elapsed_ms: Some(elapsed_ms),
        }
    }

    pub fn fail(
        path: &str,
        method: &str,
        reason: impl Into<String>,
        status_code: Option<u16>,
        elapsed_ms: Option<u64>,
    ) -> Self {
        Self {
            path: path.to_string(),
            method: method.to_string(),
            passed: false,
            reason: reason.into(),
            status_code,
            elapsed_ms,
        }
    }
}

/// 汇总
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub passed: usize,
    pub total: usize,
}

impl Tally {
    pub fn of(rows: &[CheckRow]) -> Self {
        Self {
            passed: rows.iter().filter(|r| r.passed).count(),
            total: rows.len(),
        }
    }

    /// 整数百分比（向下取整）；total 为 0 时为 0
    pub fn percentage(&self) -> u64 {
        if self.total == 0 {
            return 0;
        }
        (self.passed * 100 / self.total) as u64
    }

    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.passed == self.total
    }
}

/// 前 `limit` 条失败，格式 `METHOD path: reason`，以 `; ` 连接
pub fn failure_summary(rows: &[CheckRow], limit: usize) -> String {
    rows.iter()
        .filter(|r| !r.passed)
        .take(limit)
        .map(|r| format!("{} {}: {}", r.method, r.path, r.reason))
        .collect::<Vec<_>>()
        .join("; ")
}
