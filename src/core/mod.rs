//! 核心：错误类型与原子写

pub mod error;
pub mod fs;

pub use error::{BackendError, CheckpointError, GoalLookupError, MemoryError};
pub use fs::write_atomic;
