//! 记忆层：跨运行的项目级经验库，以及从运行结果中提炼经验

pub mod extractor;
pub mod store;

pub use extractor::{strip_code_fences, ExtractorSettings, LearningExtractor, RunOutcome, MAX_LEARNINGS};
pub use store::{Category, Memory, MemorySettings, MemoryStore, DEFAULT_MEMORY_PATH, MAX_MEMORIES};
