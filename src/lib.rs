//! Retrai - 自主编码智能体的持久化与终止控制核心
//!
//! 模块划分：
//! - **agent**: 运行状态（对话轮次 + 运行元数据）
//! - **checkpoint**: 断点存取，中断后从同一 run_id 续跑
//! - **config**: 运行配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **goals**: 目标协议、API 契约目标、SQL 性能目标、每轮评估
//! - **llm**: LLM 客户端抽象与 Mock
//! - **memory**: 跨运行记忆库与经验提炼
//! - **observability**: tracing 初始化
//! - **tools**: diff 来源

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod goals;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use agent::{Message, RunState, StopMode};
pub use checkpoint::CheckpointStore;
pub use config::{load_config, AppConfig};
pub use goals::{evaluate, get_goal, Goal, GoalResult, RunPhase};
pub use memory::{LearningExtractor, Memory, MemoryStore};
