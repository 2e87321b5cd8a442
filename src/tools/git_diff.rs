use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

/// 产出工作目录最近改动的文本 diff
#[async_trait]
pub trait DiffSource: Send + Sync {
    async fn recent_diff(&self, cwd: &Path) -> Result<String, String>;
}

/// `git diff`（未暂存改动；`staged` 时为 `--cached`）
#[derive(Debug, Default, Clone)]
pub struct GitDiff {
    staged: bool,
}

impl GitDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn staged() -> Self {
        Self { staged: true }
    }

    fn is_git_repo(&self, path: &Path) -> bool {
        path.ancestors().any(|p| p.join(".git").exists())
    }

    async fn run_git_command(&self, args: &[&str], cwd: &Path) -> Result<String, String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| format!("Failed to run git: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("Git command failed: {}", stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl DiffSource for GitDiff {
    async fn recent_diff(&self, cwd: &Path) -> Result<String, String> {
        if !self.is_git_repo(cwd) {
            return Err(format!("Not a git repository: {}", cwd.display()));
        }
        let mut args = vec!["diff"];
        if self.staged {
            args.push("--cached");
        }
        self.run_git_command(&args, cwd).await
    }
}

/// 固定 diff（测试与离线场景）
#[derive(Debug, Default, Clone)]
pub struct StaticDiff(pub String);

#[async_trait]
impl DiffSource for StaticDiff {
    async fn recent_diff(&self, _cwd: &Path) -> Result<String, String> {
        Ok(self.0.clone())
    }
}
