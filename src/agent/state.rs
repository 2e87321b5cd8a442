//! 运行状态：一次 Agent 运行的可变快照
//!
//! 对话轮次（Message）只追加、顺序敏感；其余为标量元数据。`extras` 容纳调用方附加的任意字段，
//! 其值可能无法编码（见 [`StateField`]），断点保存时会退化为字符串形式。

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 对话轮次：带角色标签的联合类型
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    System(String),
    Human(String),
    Assistant(String),
    /// 工具结果，附带对应的 tool_call_id
    ToolResult { tool_call_id: String, content: String },
}

/// 仅角色（不含内容），用于比较轮次顺序
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    Human,
    Assistant,
    Tool,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System(content.into())
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::Human(content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(content.into())
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::System(_) => Role::System,
            Message::Human(_) => Role::Human,
            Message::Assistant(_) => Role::Assistant,
            Message::ToolResult { .. } => Role::Tool,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System(c) | Message::Human(c) | Message::Assistant(c) => c,
            Message::ToolResult { content, .. } => content,
        }
    }
}

/// 停止模式：hard 到达迭代上限即停；soft 在倒数第二轮提示 Agent 收尾并写总结
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMode {
    Soft,
    #[default]
    Hard,
}

/// 附加字段：可尝试编码为 JSON，失败时以 Display 形式落盘
pub trait StateField: fmt::Debug + fmt::Display + Send + Sync {
    fn to_json(&self) -> Result<Value, String>;

    /// 若本身就是 JSON 值（例如从断点读回的字段），返回其引用
    fn as_json(&self) -> Option<&Value> {
        None
    }
}

impl StateField for Value {
    fn to_json(&self) -> Result<Value, String> {
        Ok(self.clone())
    }

    fn as_json(&self) -> Option<&Value> {
        Some(self)
    }
}

/// 一次运行的完整可变状态
#[derive(Debug)]
pub struct RunState {
    pub messages: Vec<Message>,
    pub run_id: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub model_name: String,
    pub stop_mode: StopMode,
    pub hitl_enabled: bool,
    pub cwd: PathBuf,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
    /// 成本上限（美元），None 表示不限
    pub max_cost_usd: Option<f64>,
    pub failed_strategies: Vec<String>,
    pub consecutive_failures: u32,
    /// 只读工具结果缓存：key = "tool_name:json_args"
    pub tool_cache: BTreeMap<String, String>,
    pub mop_enabled: bool,
    pub mop_k: u32,
    pub goal_achieved: bool,
    pub goal_reason: String,
    pub extras: BTreeMap<String, Box<dyn StateField>>,
}

impl RunState {
    /// 新建运行状态；run_id 为空时生成 UUID
    pub fn new(run_id: impl Into<String>, model_name: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        let mut run_id = run_id.into();
        if run_id.is_empty() {
            run_id = uuid::Uuid::new_v4().to_string();
        }
        Self {
            messages: Vec::new(),
            run_id,
            iteration: 0,
            max_iterations: 20,
            model_name: model_name.into(),
            stop_mode: StopMode::Hard,
            hitl_enabled: false,
            cwd: cwd.into(),
            total_tokens: 0,
            estimated_cost_usd: 0.0,
            max_cost_usd: None,
            failed_strategies: Vec::new(),
            consecutive_failures: 0,
            tool_cache: BTreeMap::new(),
            mop_enabled: false,
            mop_k: 3,
            goal_achieved: false,
            goal_reason: String::new(),
            extras: BTreeMap::new(),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// 追加一轮对话（只追加，不改写历史）
    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: impl StateField + 'static) {
        self.extras.insert(key.into(), Box::new(value));
    }

    pub fn extra(&self, key: &str) -> Option<&dyn StateField> {
        self.extras.get(key).map(|v| v.as_ref())
    }

    /// 是否已超出成本上限
    pub fn over_budget(&self) -> bool {
        self.max_cost_usd
            .is_some_and(|ceiling| self.estimated_cost_usd > ceiling)
    }

    pub fn iterations_left(&self) -> u32 {
        self.max_iterations.saturating_sub(self.iteration)
    }
}
