//! Agent 运行状态（对话轮次 + 运行元数据），由外部主循环驱动，断点存取与目标评估读写它

pub mod state;

pub use state::{Message, Role, RunState, StateField, StopMode};
