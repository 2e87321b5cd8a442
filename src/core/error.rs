//! 核心错误类型
//!
//! 按「调用方误用」与「外部世界不配合」划分：前者（未知 run_id、非法 run_id）以 Err 抛出；
//! 后者（网络、服务、查询失败）在目标检查中被折叠为 GoalResult，不以错误形式外泄。

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 断点存取错误
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Invalid run id: {0:?}")]
    InvalidRunId(String),

    #[error("No checkpoint found for run_id={run_id:?} at {}", path.display())]
    NotFound { run_id: String, path: PathBuf },

    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 读取时解码失败：不做部分恢复，直接上抛
    #[error("Checkpoint decode error: {0}")]
    Decode(String),

    #[error("Checkpoint encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 记忆库持久化错误（读取/解码失败不会走到这里，只会重置为空库）
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Memory file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// SQL 后端错误；在 SqlBenchmarkGoal 内映射为失败的 GoalResult
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{0}")]
    MissingConfig(String),

    #[error("Missing dependency: {0}")]
    UnsupportedBackend(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("{0}")]
    Execution(String),

    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("backend lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> Self {
        BackendError::Execution(e.to_string())
    }
}

/// 按名称查找目标失败
#[derive(Error, Debug)]
#[error("Unknown goal: '{name}'. Available: {available}")]
pub struct GoalLookupError {
    pub name: String,
    pub available: String,
}
