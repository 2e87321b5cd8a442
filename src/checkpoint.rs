//! 断点存取：将 RunState 写入/读出 `<base_dir>/<run_id>.json`，用于中断后续跑
//!
//! - 对话轮次编码为 `{type, content[, tool_call_id]}`，读取时按 type 还原，未知/缺失 type 宽松地还原为 Human
//! - 其余字段逐个编码，单个字段编码失败时退化为其字符串形式，保证一次保存不会因个别字段丢失整轮运行
//! - 读取时文件损坏或已知字段类型不符直接报错，不做部分恢复

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::{Message, RunState};
use crate::core::{write_atomic, CheckpointError};

/// 默认断点目录（相对当前工作目录）
pub const DEFAULT_CHECKPOINT_DIR: &str = ".retrai/checkpoints";

const MESSAGES_KEY: &str = "messages";

/// 已知字段名；同名的 extras 不落盘，避免覆盖已知字段后无法读回
const RESERVED_KEYS: &[&str] = &[
    MESSAGES_KEY,
    "run_id",
    "iteration",
    "max_iterations",
    "model_name",
    "stop_mode",
    "hitl_enabled",
    "cwd",
    "total_tokens",
    "estimated_cost_usd",
    "max_cost_usd",
    "failed_strategies",
    "consecutive_failures",
    "tool_cache",
    "mop_enabled",
    "mop_k",
    "goal_achieved",
    "goal_reason",
];

// ---------- 对话轮次编解码 ----------

/// 落盘的单条轮次
#[derive(Debug, Serialize, Deserialize)]
struct TurnRecord {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default)]
    content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

fn encode_turn(msg: &Message) -> TurnRecord {
    let (kind, tool_call_id) = match msg {
        Message::System(_) => ("system", None),
        Message::Human(_) => ("human", None),
        Message::Assistant(_) => ("assistant", None),
        Message::ToolResult { tool_call_id, .. } => ("tool", Some(tool_call_id.clone())),
    };
    TurnRecord {
        kind: Some(kind.to_string()),
        content: Value::String(msg.content().to_string()),
        tool_call_id,
    }
}

/// 宽松还原：未知或缺失的 type 视为 Human；tool 缺少 tool_call_id 时用空串。
/// 同时接受旧版类名标签（HumanMessage / AIMessage / SystemMessage / ToolMessage）。
fn decode_turn(record: TurnRecord) -> Message {
    let content = match record.content {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    };
    match record.kind.as_deref().unwrap_or_default() {
        "system" | "SystemMessage" => Message::System(content),
        "assistant" | "ai" | "AIMessage" => Message::Assistant(content),
        "tool" | "ToolMessage" => Message::ToolResult {
            tool_call_id: record.tool_call_id.unwrap_or_default(),
            content,
        },
        _ => Message::Human(content),
    }
}

// ---------- 字段编解码 ----------

/// 逐字段编码；失败时写入 Debug 文本而不是中断保存
fn encode_field<T: Serialize + Debug>(out: &mut Map<String, Value>, key: &str, value: &T) {
    let encoded = serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::warn!(field = key, error = %e, "checkpoint field not encodable, storing string form");
        Value::String(format!("{:?}", value))
    });
    out.insert(key.to_string(), encoded);
}

/// 浮点字段：NaN / ±inf 无法表示为 JSON 数字，写成文本（"NaN"、"inf"、"-inf"）
fn encode_float(out: &mut Map<String, Value>, key: &str, value: Option<f64>) {
    let encoded = match value {
        None => Value::Null,
        Some(v) if v.is_finite() => Value::from(v),
        Some(v) => {
            tracing::warn!(field = key, value = %v, "non-finite float, storing string form");
            Value::String(v.to_string())
        }
    };
    out.insert(key.to_string(), encoded);
}

/// 读回浮点字段：数字、或 encode_float 写出的文本
fn take_float(raw: &mut Map<String, Value>, key: &str) -> Result<Option<f64>, CheckpointError> {
    match raw.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| CheckpointError::Decode(format!("field '{}': {}", key, e))),
        Some(v) => serde_json::from_value(v)
            .map(Some)
            .map_err(|e| CheckpointError::Decode(format!("field '{}': {}", key, e))),
    }
}

/// 取出已知字段：缺失或 null 用默认值，类型不符报 Decode
fn take_field<T: DeserializeOwned + Default>(
    raw: &mut Map<String, Value>,
    key: &str,
) -> Result<T, CheckpointError> {
    match raw.remove(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v)
            .map_err(|e| CheckpointError::Decode(format!("field '{}': {}", key, e))),
    }
}

fn encode_state(state: &RunState) -> Map<String, Value> {
    let mut out = Map::new();
    let turns: Vec<TurnRecord> = state.messages.iter().map(encode_turn).collect();
    encode_field(&mut out, MESSAGES_KEY, &turns);
    encode_field(&mut out, "run_id", &state.run_id);
    encode_field(&mut out, "iteration", &state.iteration);
    encode_field(&mut out, "max_iterations", &state.max_iterations);
    encode_field(&mut out, "model_name", &state.model_name);
    encode_field(&mut out, "stop_mode", &state.stop_mode);
    encode_field(&mut out, "hitl_enabled", &state.hitl_enabled);
    encode_field(&mut out, "cwd", &state.cwd);
    encode_field(&mut out, "total_tokens", &state.total_tokens);
    encode_float(&mut out, "estimated_cost_usd", Some(state.estimated_cost_usd));
    encode_float(&mut out, "max_cost_usd", state.max_cost_usd);
    encode_field(&mut out, "failed_strategies", &state.failed_strategies);
    encode_field(&mut out, "consecutive_failures", &state.consecutive_failures);
    encode_field(&mut out, "tool_cache", &state.tool_cache);
    encode_field(&mut out, "mop_enabled", &state.mop_enabled);
    encode_field(&mut out, "mop_k", &state.mop_k);
    encode_field(&mut out, "goal_achieved", &state.goal_achieved);
    encode_field(&mut out, "goal_reason", &state.goal_reason);

    for (key, field) in &state.extras {
        if RESERVED_KEYS.contains(&key.as_str()) {
            tracing::warn!(field = %key, "extra field shadows a known field, skipped");
            continue;
        }
        let value = field.to_json().unwrap_or_else(|e| {
            tracing::warn!(field = %key, error = %e, "extra field not encodable, storing string form");
            Value::String(field.to_string())
        });
        out.insert(key.clone(), value);
    }
    out
}

fn decode_state(mut raw: Map<String, Value>) -> Result<RunState, CheckpointError> {
    let turns: Vec<TurnRecord> = take_field(&mut raw, MESSAGES_KEY)?;
    let run_id: String = take_field(&mut raw, "run_id")?;
    let model_name: String = take_field(&mut raw, "model_name")?;
    let cwd: PathBuf = take_field(&mut raw, "cwd")?;

    let mut state = RunState::new(run_id, model_name, cwd);
    state.messages = turns.into_iter().map(decode_turn).collect();
    state.iteration = take_field(&mut raw, "iteration")?;
    if raw.contains_key("max_iterations") {
        state.max_iterations = take_field(&mut raw, "max_iterations")?;
    }
    state.stop_mode = take_field(&mut raw, "stop_mode")?;
    state.hitl_enabled = take_field(&mut raw, "hitl_enabled")?;
    state.total_tokens = take_field(&mut raw, "total_tokens")?;
    state.estimated_cost_usd = take_float(&mut raw, "estimated_cost_usd")?.unwrap_or_default();
    state.max_cost_usd = take_float(&mut raw, "max_cost_usd")?;
    state.failed_strategies = take_field(&mut raw, "failed_strategies")?;
    state.consecutive_failures = take_field(&mut raw, "consecutive_failures")?;
    state.tool_cache = take_field::<BTreeMap<String, String>>(&mut raw, "tool_cache")?;
    state.mop_enabled = take_field(&mut raw, "mop_enabled")?;
    if raw.contains_key("mop_k") {
        state.mop_k = take_field(&mut raw, "mop_k")?;
    }
    state.goal_achieved = take_field(&mut raw, "goal_achieved")?;
    state.goal_reason = take_field(&mut raw, "goal_reason")?;

    // 其余未知字段原样保留为 JSON 值
    for (key, value) in raw {
        state.extras.insert(key, Box::new(value));
    }
    Ok(state)
}

// ---------- 存储 ----------

/// 断点存储：每个 run_id 一个 JSON 文件，同名覆盖；不加锁，调用方保证同一 run_id 单写者
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    base_dir: PathBuf,
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKPOINT_DIR)
    }
}

impl CheckpointStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 断点文件路径（不要求文件存在）
    pub fn checkpoint_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", run_id))
    }

    fn validate_run_id(run_id: &str) -> Result<(), CheckpointError> {
        if run_id.trim().is_empty() || run_id.contains(['/', '\\']) || run_id == "." || run_id == ".." {
            return Err(CheckpointError::InvalidRunId(run_id.to_string()));
        }
        Ok(())
    }

    /// 保存状态并返回写入路径；目录不存在时自动创建，写入失败时旧断点不受影响
    pub fn save(&self, state: &RunState, run_id: &str) -> Result<PathBuf, CheckpointError> {
        Self::validate_run_id(run_id)?;
        let path = self.checkpoint_path(run_id);
        let record = Value::Object(encode_state(state));
        write_atomic(&path, &serde_json::to_string_pretty(&record)?)?;
        tracing::info!(path = %path.display(), turns = state.messages.len(), "Checkpoint saved");
        Ok(path)
    }

    /// 读取并还原状态；不存在时返回 NotFound
    pub fn load(&self, run_id: &str) -> Result<RunState, CheckpointError> {
        Self::validate_run_id(run_id)?;
        let path = self.checkpoint_path(run_id);
        if !path.exists() {
            return Err(CheckpointError::NotFound {
                run_id: run_id.to_string(),
                path,
            });
        }
        let data = std::fs::read_to_string(&path)?;
        let raw: Map<String, Value> =
            serde_json::from_str(&data).map_err(|e| CheckpointError::Decode(e.to_string()))?;
        let state = decode_state(raw)?;
        tracing::info!(path = %path.display(), turns = state.messages.len(), "Checkpoint loaded");
        Ok(state)
    }

    /// 列出已保存的 run_id（按文件名排序）；目录不存在时返回空
    pub fn list_checkpoints(&self) -> Result<Vec<String>, CheckpointError> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = std::fs::read_dir(&self.base_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// 删除断点（外部清理使用）；返回是否真的删除了文件
    pub fn delete(&self, run_id: &str) -> Result<bool, CheckpointError> {
        Self::validate_run_id(run_id)?;
        let path = self.checkpoint_path(run_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        tracing::info!(path = %path.display(), "Checkpoint deleted");
        Ok(true)
    }
}
