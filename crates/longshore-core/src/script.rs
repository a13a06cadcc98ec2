//! External process execution for script-backed components.
//!
//! Script inputs, filters, transformers, validators, and commands all share
//! [`ScriptSpec`]: a command vector plus a timeout, with per-batch
//! placeholder expansion for arguments.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::batch::Batch;

/// Timeout applied when a script component does not configure one.
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 300;

/// Errors from launching or supervising an external script.
///
/// A non-zero exit is not automatically an error; callers that treat it as
/// fatal go through [`ScriptOutput::expect_success`]. Timeouts are always
/// errors and are distinguishable from ordinary failures.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script has an empty command vector")]
    EmptyCommand,

    #[error("failed to spawn script {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("script {command} timed out after {timeout_secs} seconds")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("script {command} exited with status {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: i32,
        stderr: String,
    },
}

/// Captured output of a finished script.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Turn a non-zero exit into [`ScriptError::NonZeroExit`].
    pub fn expect_success(self, command: &str) -> Result<ScriptOutput, ScriptError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ScriptError::NonZeroExit {
                command: command.to_string(),
                status: self.status,
                stderr: self.stderr,
            })
        }
    }
}

/// Command vector plus timeout, the persisted form shared by every script
/// component.
///
/// Arguments may contain the placeholders `{keys}` (expands to one argument
/// per item key), `{extra_data}` (single JSON argument mapping keys to their
/// extra data), and `{metadata}` (single JSON argument with the batch
/// metadata).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSpec {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_SCRIPT_TIMEOUT_SECS
}

impl ScriptSpec {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            timeout_secs: DEFAULT_SCRIPT_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Rendered form for logs and errors.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    /// Arguments with batch placeholders expanded.
    pub fn args_for_batch(&self, batch: &Batch) -> serde_json::Result<Vec<String>> {
        let mut args = Vec::new();
        for arg in self.command.iter().skip(1) {
            match arg.as_str() {
                "{keys}" => args.extend(batch.keys().map(str::to_string)),
                "{extra_data}" => {
                    let extras: BTreeMap<&str, &BTreeMap<String, serde_json::Value>> = batch
                        .items
                        .iter()
                        .filter_map(|item| {
                            item.extra_data.as_ref().map(|data| (item.key.as_str(), data))
                        })
                        .collect();
                    args.push(serde_json::to_string(&extras)?);
                }
                "{metadata}" => args.push(serde_json::to_string(&batch.metadata)?),
                _ => args.push(arg.clone()),
            }
        }
        Ok(args)
    }

    /// Arguments with `{keys}` expanded from an explicit key list. Used by
    /// components that run before any batch exists (inputs, bulk filters).
    pub fn args_for_keys(&self, keys: &[String]) -> Vec<String> {
        let mut args = Vec::new();
        for arg in self.command.iter().skip(1) {
            if arg == "{keys}" {
                args.extend(keys.iter().cloned());
            } else {
                args.push(arg.clone());
            }
        }
        args
    }

    /// Run the program with the given arguments, enforcing the timeout.
    ///
    /// Stdout and stderr are captured; the child is killed if the timeout
    /// expires or the future is dropped.
    pub async fn run(&self, args: &[String]) -> Result<ScriptOutput, ScriptError> {
        let program = self.command.first().ok_or(ScriptError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(script = %self.command_line(), timeout_secs = self.timeout_secs, "spawning script");

        let child = cmd.spawn().map_err(|source| ScriptError::Spawn {
            command: self.command_line(),
            source,
        })?;

        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| ScriptError::Timeout {
            command: self.command_line(),
            timeout_secs: self.timeout_secs,
        })?
        .map_err(|source| ScriptError::Spawn {
            command: self.command_line(),
            source,
        })?;

        Ok(ScriptOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;
    use serde_json::json;

    fn spec(command: &[&str]) -> ScriptSpec {
        ScriptSpec::new(command.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_keys_placeholder_expands_per_item() {
        let batch = Batch::new("fixups").with_items(vec![Item::new("a.py"), Item::new("b.py")]);
        let args = spec(&["fixer", "--files", "{keys}"])
            .args_for_batch(&batch)
            .unwrap();
        assert_eq!(args, vec!["--files", "a.py", "b.py"]);
    }

    #[test]
    fn test_extra_data_placeholder_skips_items_without_extras() {
        let batch = Batch::new("fixups").with_items(vec![
            Item::new("a.py").with_extra("ticket", json!("LS-12")),
            Item::new("b.py"),
        ]);
        let args = spec(&["fixer", "{extra_data}"]).args_for_batch(&batch).unwrap();
        assert_eq!(args.len(), 1);
        let decoded: serde_json::Value = serde_json::from_str(&args[0]).unwrap();
        assert_eq!(decoded, json!({"a.py": {"ticket": "LS-12"}}));
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let output = spec(&["echo"]).run(&["hello".to_string()]).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported_not_raised() {
        let output = spec(&["false"]).run(&[]).await.unwrap();
        assert!(!output.success());
        assert!(matches!(
            output.expect_success("false"),
            Err(ScriptError::NonZeroExit { status: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_distinguishable() {
        let slow = spec(&["sleep"]).with_timeout_secs(1);
        let err = slow.run(&["5".to_string()]).await.unwrap_err();
        assert!(matches!(err, ScriptError::Timeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let missing = spec(&["longshore-no-such-binary"]);
        let err = missing.run(&[]).await.unwrap_err();
        assert!(matches!(err, ScriptError::Spawn { .. }));
    }
}
