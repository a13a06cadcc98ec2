//! Input over `git grep` matches.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use longshore_core::context::ExecutionContext;
use longshore_core::input::Input;
use longshore_core::Item;

use crate::error::GitError;

/// Yields one item per tracked file matching a pattern, keyed by the file's
/// path under the repo root.
#[derive(Debug, Clone)]
pub struct GitGrepInput {
    path: PathBuf,
    pattern: String,
}

impl GitGrepInput {
    pub fn new(path: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            pattern: pattern.into(),
        }
    }
}

#[async_trait]
impl Input for GitGrepInput {
    fn name(&self) -> &str {
        "git_grep"
    }

    async fn get_items(&self, _ctx: &ExecutionContext) -> anyhow::Result<Vec<Item>> {
        let output = Command::new("git")
            .args(["grep", "-l", "-e", &self.pattern])
            .current_dir(&self.path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| GitError::Spawn { source })?;

        // Exit 1 means no matches, which is not a failure.
        let status = output.status.code().unwrap_or(-1);
        if status != 0 && status != 1 {
            return Err(GitError::CommandFailed {
                command: format!("grep -l -e {}", self.pattern),
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);

        let mut items: Vec<Item> = stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Item::new(self.path.join(line.trim()).to_string_lossy()))
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }
}
