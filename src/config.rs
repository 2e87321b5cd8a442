//! 运行配置：从 config/default.toml（或 retrai.toml）与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RETRAI__*` 覆盖（双下划线表示嵌套，如 `RETRAI__MEMORY__MAX_MEMORIES=80`）。
//! 项目级的目标配置在 `.retrai.yml`，见 [`crate::goals::project_config`]。

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::checkpoint::{CheckpointStore, DEFAULT_CHECKPOINT_DIR};
use crate::llm::LlmClient;
use crate::memory::{
    ExtractorSettings, LearningExtractor, MemorySettings, DEFAULT_MEMORY_PATH, MAX_LEARNINGS, MAX_MEMORIES,
};
use crate::tools::DiffSource;

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub checkpoint: CheckpointSection,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub extractor: ExtractorSection,
    #[serde(default)]
    pub goals: GoalsSection,
}

impl AppConfig {
    /// 按 [memory] 与 [extractor] 段构造经验提炼器
    pub fn learning_extractor(&self, llm: Arc<dyn LlmClient>, diff: Arc<dyn DiffSource>) -> LearningExtractor {
        LearningExtractor::new(llm, diff)
            .with_memory_settings(self.memory.settings())
            .with_settings(self.extractor.settings())
    }
}

/// [checkpoint] 段：断点目录
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointSection {
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CHECKPOINT_DIR)
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

impl CheckpointSection {
    pub fn store(&self) -> CheckpointStore {
        CheckpointStore::new(&self.dir)
    }
}

/// [memory] 段：记忆文件路径（相对项目目录）、容量、注入 prompt 的条数
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_memory_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_memories")]
    pub max_memories: usize,
    #[serde(default = "default_prompt_limit")]
    pub prompt_limit: usize,
}

fn default_memory_path() -> PathBuf {
    PathBuf::from(DEFAULT_MEMORY_PATH)
}

fn default_max_memories() -> usize {
    MAX_MEMORIES
}

fn default_prompt_limit() -> usize {
    10
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            path: default_memory_path(),
            max_memories: default_max_memories(),
            prompt_limit: default_prompt_limit(),
        }
    }
}

impl MemorySection {
    pub fn settings(&self) -> MemorySettings {
        MemorySettings {
            path: self.path.clone(),
            max_memories: self.max_memories,
        }
    }
}

/// [extractor] 段：diff 截断长度、单次最多经验条数（上限 3）
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorSection {
    #[serde(default = "default_max_diff_chars")]
    pub max_diff_chars: usize,
    #[serde(default = "default_max_learnings")]
    pub max_learnings: usize,
}

fn default_max_diff_chars() -> usize {
    4000
}

fn default_max_learnings() -> usize {
    MAX_LEARNINGS
}

impl Default for ExtractorSection {
    fn default() -> Self {
        Self {
            max_diff_chars: default_max_diff_chars(),
            max_learnings: default_max_learnings(),
        }
    }
}

impl ExtractorSection {
    pub fn settings(&self) -> ExtractorSettings {
        ExtractorSettings {
            max_diff_chars: self.max_diff_chars,
            max_learnings: self.max_learnings.min(MAX_LEARNINGS),
        }
    }
}

/// [goals] 段：端点默认超时、单条查询超时（秒）
#[derive(Debug, Clone, Deserialize)]
pub struct GoalsSection {
    #[serde(default = "default_http_timeout_secs")]
    pub default_http_timeout_secs: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_query_timeout_secs() -> u64 {
    300
}

impl Default for GoalsSection {
    fn default() -> Self {
        Self {
            default_http_timeout_secs: default_http_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

/// 加载配置，环境变量 RETRAI__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、retrai.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RETRAI__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();
    for name in ["config/default", "retrai"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RETRAI")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
