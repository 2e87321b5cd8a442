//! 跨运行记忆库：每个项目一个 JSON 文件（默认 .retrai/memory.json），容量有上限
//!
//! - 加载失败（文件损坏、解码失败）只记日志并重置为空库，绝不阻塞 Agent 启动
//! - 每次 add / add_batch / clear 都整体重写文件；写失败向上返回
//! - 超出容量时按 `relevance_score × 1/(1 + age_days)` 全量重排，保留前 max_memories 条
//! - 检索为简单词重叠 + 子串匹配，不依赖向量

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{write_atomic, MemoryError};

/// 默认容量上限
pub const MAX_MEMORIES: usize = 50;

/// 默认记忆文件（相对项目目录）
pub const DEFAULT_MEMORY_PATH: &str = ".retrai/memory.json";

const FILE_VERSION: u32 = 1;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// 记忆分类；未知字符串一律归为 Tip
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Strategy,
    ErrorPattern,
    ProjectFact,
    Tip,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Strategy => "strategy",
            Category::ErrorPattern => "error_pattern",
            Category::ProjectFact => "project_fact",
            Category::Tip => "tip",
        }
    }

    /// Prompt 中使用的标记符号
    pub fn marker(&self) -> &'static str {
        match self {
            Category::Strategy => "🎯",
            Category::ErrorPattern => "⚠️",
            Category::ProjectFact => "📋",
            Category::Tip => "💡",
        }
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "strategy" => Category::Strategy,
            "error_pattern" => Category::ErrorPattern,
            "project_fact" => Category::ProjectFact,
            _ => Category::Tip,
        }
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Category::from(s.as_str())
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 当前时间（Unix 秒，含小数）
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn default_relevance() -> f64 {
    1.0
}

fn default_category() -> Category {
    Category::Tip
}

/// 一条提炼出的经验
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    #[serde(default)]
    pub insight: String,
    #[serde(default = "default_category")]
    pub category: Category,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub run_id: String,
    #[serde(default = "default_relevance")]
    pub relevance_score: f64,
}

impl Memory {
    pub fn new(insight: impl Into<String>, category: Category) -> Self {
        Self {
            insight: insight.into(),
            category,
            timestamp: now_timestamp(),
            run_id: String::new(),
            relevance_score: 1.0,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// 衰减后的保留分：relevance × 1/(1 + age_days)；未来时间戳按 0 天计
    pub fn retention_score(&self, now: f64) -> f64 {
        let age_days = ((now - self.timestamp) / SECONDS_PER_DAY).max(0.0);
        self.relevance_score * (1.0 / (1.0 + age_days))
    }
}

/// 记忆库构造参数（替代全局常量，便于用临时目录测试）
#[derive(Clone, Debug)]
pub struct MemorySettings {
    /// 相对项目目录的文件路径
    pub path: PathBuf,
    pub max_memories: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MEMORY_PATH),
            max_memories: MAX_MEMORIES,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    memories: Vec<Memory>,
}

/// 单项目记忆库；不加锁，调用方保证同一项目单写者
#[derive(Debug)]
pub struct MemoryStore {
    path: PathBuf,
    max_memories: usize,
    memories: Vec<Memory>,
}

/// 切分为小写词集合
fn word_set(s: &str) -> HashSet<String> {
    s.split_whitespace().map(|w| w.to_lowercase()).collect()
}

impl MemoryStore {
    /// 打开项目记忆库；文件缺失或损坏时为空库
    pub fn open(project_dir: impl AsRef<Path>, settings: MemorySettings) -> Self {
        let path = project_dir.as_ref().join(&settings.path);
        let mut store = Self {
            path,
            max_memories: settings.max_memories.max(1),
            memories: Vec::new(),
        };
        store.load();
        store
    }

    /// 使用默认路径与容量
    pub fn open_default(project_dir: impl AsRef<Path>) -> Self {
        Self::open(project_dir, MemorySettings::default())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.max_memories
    }

    fn load(&mut self) {
        if !self.path.exists() {
            return;
        }
        let parsed = std::fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|data| serde_json::from_str::<MemoryFile>(&data).map_err(|e| e.to_string()));
        match parsed {
            Ok(file) => {
                self.memories = file.memories;
                tracing::debug!(count = self.memories.len(), path = %self.path.display(), "memories loaded");
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "memory file unreadable, starting empty");
                self.memories.clear();
            }
        }
    }

    fn save(&self) -> Result<(), MemoryError> {
        let file = MemoryFile {
            version: FILE_VERSION,
            memories: self.memories.clone(),
        };
        write_atomic(&self.path, &serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn add(&mut self, memory: Memory) -> Result<(), MemoryError> {
        self.memories.push(memory);
        self.prune();
        self.save()
    }

    /// 批量追加：只剪枝、写盘一次
    pub fn add_batch(&mut self, memories: Vec<Memory>) -> Result<(), MemoryError> {
        if memories.is_empty() {
            return Ok(());
        }
        self.memories.extend(memories);
        self.prune();
        self.save()
    }

    /// 超出容量时按衰减分全量重排并截断
    pub fn prune(&mut self) {
        if self.memories.len() <= self.max_memories {
            return;
        }
        let now = now_timestamp();
        let mut scored: Vec<(f64, Memory)> = self
            .memories
            .drain(..)
            .map(|m| (m.retention_score(now), m))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        let dropped = scored.len() - self.max_memories;
        self.memories = scored
            .into_iter()
            .take(self.max_memories)
            .map(|(_, m)| m)
            .collect();
        tracing::debug!(dropped, kept = self.memories.len(), "memories pruned");
    }

    /// 词重叠 + 子串匹配检索，按得分降序（同分保持原顺序）
    pub fn search(&self, query: &str, limit: usize) -> Vec<Memory> {
        let query_lower = query.to_lowercase();
        let query_words = word_set(&query_lower);
        let mut scored: Vec<(f64, &Memory)> = self
            .memories
            .iter()
            .filter_map(|m| {
                let insight_lower = m.insight.to_lowercase();
                let overlap = query_words.intersection(&word_set(&insight_lower)).count();
                let substring = insight_lower.contains(&query_lower);
                if overlap > 0 || substring {
                    let score = overlap as f64 + if substring { 1.0 } else { 0.0 };
                    Some((score, m))
                } else {
                    None
                }
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().take(limit).map(|(_, m)| m.clone()).collect()
    }

    pub fn get_all(&self) -> Vec<Memory> {
        self.memories.clone()
    }

    pub fn clear(&mut self) -> Result<(), MemoryError> {
        self.memories.clear();
        self.save()
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    /// 拼入 system prompt 的段落：取最近 limit 条（按时间，不按相关度）；空库返回空串
    pub fn format_for_prompt(&self, limit: usize) -> String {
        if self.memories.is_empty() {
            return String::new();
        }
        let mut recent: Vec<&Memory> = self.memories.iter().collect();
        recent.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));

        let mut lines = vec!["## Past Learnings (from previous runs)\n".to_string()];
        lines.extend(
            recent
                .into_iter()
                .take(limit)
                .map(|m| format!("- {} {}", m.category.marker(), m.insight)),
        );
        lines.push(
            "\nUse these learnings to avoid repeating mistakes and to apply successful strategies."
                .to_string(),
        );
        lines.join("\n")
    }
}
