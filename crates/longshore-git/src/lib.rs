//! Longshore Git Integration
//!
//! A [`Repo`](longshore_core::Repo) implementation over local git branches,
//! plus a `git grep` backed input. Call [`register`] to make both available
//! to config documents under the `git` and `git_grep` tags.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use longshore_core::config::{ComponentRegistry, ConfigError};
use longshore_core::input::Input;
use longshore_core::repo::Repo;

pub mod error;
pub mod grep;
pub mod repo;

pub use error::GitError;
pub use grep::GitGrepInput;
pub use repo::GitRepo;

/// Registers the git-backed components.
pub fn register(registry: &mut ComponentRegistry) {
    registry.register_repo("git", build_git_repo);
    registry.register_input("git_grep", build_git_grep_input);
}

fn default_branch_prefix() -> String {
    "longshore/".to_string()
}

fn build_git_repo(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Arc<dyn Repo>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        path: PathBuf,
        base_branch: String,
        #[serde(default = "default_branch_prefix")]
        branch_prefix: String,
    }
    let params: Params =
        serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidParams {
            component: "git repo".to_string(),
            message: e.to_string(),
        })?;
    Ok(Arc::new(
        GitRepo::new(params.path, params.base_branch).with_branch_prefix(params.branch_prefix),
    ))
}

fn build_git_grep_input(
    _registry: &ComponentRegistry,
    value: &Value,
) -> Result<Box<dyn Input>, ConfigError> {
    #[derive(Deserialize)]
    struct Params {
        path: PathBuf,
        pattern: String,
    }
    let params: Params =
        serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidParams {
            component: "git grep input".to_string(),
            message: e.to_string(),
        })?;
    Ok(Box::new(GitGrepInput::new(params.path, params.pattern)))
}
