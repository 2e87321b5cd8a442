//! 经验提炼：把一次运行的结果（目标、是否达成、迭代数、git diff）交给 LLM，提炼 0~3 条经验写入记忆库
//!
//! 尽力而为：diff 为空直接返回 0；LLM 调用失败、输出无法解析都只记日志并视为 0 条，绝不让所属运行失败。
//! 解析成功的条目一次性 add_batch，保证每次运行只剪枝一次。

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::agent::Message;
use crate::core::MemoryError;
use crate::llm::LlmClient;
use crate::memory::store::{Category, Memory, MemorySettings, MemoryStore};
use crate::tools::DiffSource;

/// 单次运行保留经验条数的硬上限
pub const MAX_LEARNINGS: usize = 3;

/// 提炼参数
#[derive(Clone, Debug)]
pub struct ExtractorSettings {
    /// 拼入 prompt 的 diff 最大字符数
    pub max_diff_chars: usize,
    /// 单次运行最多保留的经验条数，不超过 MAX_LEARNINGS
    pub max_learnings: usize,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            max_diff_chars: 4000,
            max_learnings: MAX_LEARNINGS,
        }
    }
}

/// 一次已结束运行的摘要
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub goal_name: String,
    pub achieved: bool,
    pub iterations_used: u32,
    pub cwd: PathBuf,
    pub model_name: String,
}

#[derive(Deserialize)]
struct RawLearning {
    #[serde(default)]
    insight: serde_json::Value,
    #[serde(default)]
    category: Option<String>,
}

/// 去掉 ```json / ``` 代码围栏
pub fn strip_code_fences(text: &str) -> &str {
    let mut content = text.trim();
    if let Some(rest) = content.strip_prefix("```json") {
        content = rest;
    } else if let Some(rest) = content.strip_prefix("```") {
        content = rest;
    }
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }
    content.trim()
}

fn build_prompt(outcome: &RunOutcome, diff: &str, max_chars: usize) -> String {
    let truncated: String = diff.chars().take(max_chars).collect();
    format!(
        r#"You are a learning extraction agent. A coding agent just completed a run.
Analyze the outcome and extract 1-3 reusable insights for future runs.

## Run Details
- **Goal**: {goal}
- **Achieved**: {achieved}
- **Iterations used**: {iterations}
- **Project directory**: {cwd}

## Changes Made (git diff)
```diff
{diff}
```

## Instructions
Extract 1-3 learnings. Each learning should be a single, actionable sentence
that would help a future agent working on this project.

Respond with a JSON array:
```json
[
  {{"insight": "The tests require REDIS_URL env var", "category": "project_fact"}},
  {{"insight": "Use file_patch for single-line fixes", "category": "strategy"}}
]
```

Categories:
- "project_fact": facts about the project structure or requirements
- "strategy": successful approach or technique
- "error_pattern": common error and how to fix it
- "tip": general productivity tip

Respond with ONLY the JSON array."#,
        goal = outcome.goal_name,
        achieved = outcome.achieved,
        iterations = outcome.iterations_used,
        cwd = outcome.cwd.display(),
        diff = truncated,
    )
}

/// 解析 LLM 输出为经验列表；非数组或格式错误返回 Err
fn parse_learnings(text: &str, run_id: &str, max: usize) -> Result<Vec<Memory>, String> {
    let content = strip_code_fences(text);
    let items: Vec<RawLearning> =
        serde_json::from_str(content).map_err(|e| format!("invalid learnings JSON: {}", e))?;
    Ok(items
        .into_iter()
        .take(max)
        .filter_map(|item| {
            let insight = match item.insight {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            if insight.trim().is_empty() {
                return None;
            }
            let category = item
                .category
                .as_deref()
                .map(Category::from)
                .unwrap_or(Category::Tip);
            Some(Memory::new(insight.trim(), category).with_run_id(run_id))
        })
        .collect())
}

/// 经验提炼器：LLM + diff 来源 + 记忆库参数
pub struct LearningExtractor {
    llm: Arc<dyn LlmClient>,
    diff: Arc<dyn DiffSource>,
    memory: MemorySettings,
    settings: ExtractorSettings,
}

impl LearningExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, diff: Arc<dyn DiffSource>) -> Self {
        Self {
            llm,
            diff,
            memory: MemorySettings::default(),
            settings: ExtractorSettings::default(),
        }
    }

    pub fn with_memory_settings(mut self, memory: MemorySettings) -> Self {
        self.memory = memory;
        self
    }

    /// 替换提炼参数；max_learnings 超出上限时截到 MAX_LEARNINGS
    pub fn with_settings(mut self, mut settings: ExtractorSettings) -> Self {
        settings.max_learnings = settings.max_learnings.min(MAX_LEARNINGS);
        self.settings = settings;
        self
    }

    /// 提炼经验但不写入；任何失败都返回空列表
    pub async fn extract_learnings(&self, outcome: &RunOutcome) -> Vec<Memory> {
        let diff = match self.diff.recent_diff(&outcome.cwd).await {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(error = %e, "no diff available for learning extraction");
                String::new()
            }
        };
        if diff.trim().is_empty() {
            return Vec::new();
        }

        let prompt = build_prompt(outcome, &diff, self.settings.max_diff_chars);
        let reply = match self.llm.complete(&[Message::human(prompt)]).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(run_id = %outcome.run_id, model = %outcome.model_name, client = self.llm.model_name(), error = %e, "Failed to extract learnings");
                return Vec::new();
            }
        };

        match parse_learnings(&reply, &outcome.run_id, self.settings.max_learnings) {
            Ok(memories) => memories,
            Err(e) => {
                tracing::warn!(run_id = %outcome.run_id, error = %e, "Failed to extract learnings");
                Vec::new()
            }
        }
    }

    /// 提炼并写入项目记忆库，返回写入条数；只有记忆库写盘失败才返回 Err
    pub async fn extract_and_store(&self, outcome: &RunOutcome) -> Result<usize, MemoryError> {
        let memories = self.extract_learnings(outcome).await;
        if memories.is_empty() {
            return Ok(0);
        }
        let count = memories.len();
        let mut store = MemoryStore::open(&outcome.cwd, self.memory.clone());
        store.add_batch(memories)?;
        tracing::info!(count, run_id = %outcome.run_id, "Stored learnings from run");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::StaticDiff;
    use tempfile::TempDir;

    fn outcome(cwd: &std::path::Path) -> RunOutcome {
        RunOutcome {
            run_id: "run-7".to_string(),
            goal_name: "pytest".to_string(),
            achieved: true,
            iterations_used: 4,
            cwd: cwd.to_path_buf(),
            model_name: "mock".to_string(),
        }
    }

    fn extractor(reply: MockLlmClient, diff: &str) -> (LearningExtractor, Arc<MockLlmClient>) {
        let llm = Arc::new(reply);
        let ext = LearningExtractor::new(llm.clone(), Arc::new(StaticDiff(diff.to_string())));
        (ext, llm)
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("```\n[2]\n```"), "[2]");
        assert_eq!(strip_code_fences("  [3]  "), "[3]");
    }

    #[tokio::test]
    async fn test_empty_diff_skips_llm() {
        let dir = TempDir::new().unwrap();
        let (ext, llm) = extractor(MockLlmClient::replying("[]"), "   ");
        let n = ext.extract_and_store(&outcome(dir.path())).await.unwrap();
        assert_eq!(n, 0);
        assert!(llm.last_prompt().is_none());
    }

    #[tokio::test]
    async fn test_extract_caps_at_three_and_tags_run() {
        let dir = TempDir::new().unwrap();
        let reply = r#"```json
[
  {"insight": "Tests require DATABASE_URL", "category": "project_fact"},
  {"insight": "Patch small diffs", "category": "strategy"},
  {"insight": "Import errors mean missing __init__", "category": "error_pattern"},
  {"insight": "Fourth one", "category": "tip"}
]
```"#;
        let (ext, llm) = extractor(MockLlmClient::replying(reply), "+fix\n");
        let n = ext.extract_and_store(&outcome(dir.path())).await.unwrap();
        assert_eq!(n, 3);

        let store = MemoryStore::open_default(dir.path());
        let all = store.get_all();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|m| m.run_id == "run-7"));
        assert_eq!(all[2].category, Category::ErrorPattern);

        let prompt = llm.last_prompt().unwrap();
        assert!(prompt.contains("- **Goal**: pytest"));
        assert!(prompt.contains("- **Iterations used**: 4"));
    }

    #[tokio::test]
    async fn test_configured_cap_never_exceeds_three() {
        let dir = TempDir::new().unwrap();
        let items: Vec<String> = (0..6)
            .map(|i| format!(r#"{{"insight": "lesson {}", "category": "tip"}}"#, i))
            .collect();
        let (ext, _) = extractor(MockLlmClient::replying(format!("[{}]", items.join(","))), "+x");
        let ext = ext.with_settings(ExtractorSettings {
            max_diff_chars: 4000,
            max_learnings: 10,
        });
        assert_eq!(ext.extract_and_store(&outcome(dir.path())).await.unwrap(), 3);

        let (ext, _) = extractor(MockLlmClient::replying(format!("[{}]", items.join(","))), "+x");
        let ext = ext.with_settings(ExtractorSettings {
            max_diff_chars: 4000,
            max_learnings: 1,
        });
        assert_eq!(ext.extract_learnings(&outcome(dir.path())).await.len(), 1);
    }

    #[tokio::test]
    async fn test_diff_truncated_in_prompt() {
        let dir = TempDir::new().unwrap();
        let long_diff = "x".repeat(5000);
        let (ext, llm) = extractor(MockLlmClient::replying("[]"), &long_diff);
        ext.extract_learnings(&outcome(dir.path())).await;
        let prompt = llm.last_prompt().unwrap();
        assert!(prompt.contains(&"x".repeat(4000)));
        assert!(!prompt.contains(&"x".repeat(4001)));
    }

    #[tokio::test]
    async fn test_llm_failure_yields_zero() {
        let dir = TempDir::new().unwrap();
        let (ext, _) = extractor(MockLlmClient::failing("rate limited"), "+x");
        assert_eq!(ext.extract_and_store(&outcome(dir.path())).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_reply_yields_zero() {
        let dir = TempDir::new().unwrap();
        let (ext, _) = extractor(MockLlmClient::replying("Sure! Here are some tips."), "+x");
        assert_eq!(ext.extract_and_store(&outcome(dir.path())).await.unwrap(), 0);
        let (ext, _) = extractor(MockLlmClient::replying(r#"{"insight": "not a list"}"#), "+x");
        assert_eq!(ext.extract_and_store(&outcome(dir.path())).await.unwrap(), 0);
    }
}
