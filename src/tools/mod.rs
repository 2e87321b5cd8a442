//! 工具：工作目录 diff 来源（供经验提炼使用）

pub mod git_diff;

pub use git_diff::{DiffSource, GitDiff, StaticDiff};
