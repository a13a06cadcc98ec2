//! Item discovery components.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::context::ExecutionContext;
use crate::item::Item;
use crate::script::ScriptSpec;

/// Extra-data key under which [`TargetedInput`] records the rewritten path.
pub const TARGET_PATH_KEY: &str = "target_path";

/// Discovers the candidate items for a run.
///
/// Discovery is read-only and must return a deterministic ordering within a
/// run; batchers rely on stable ordering for stable batch titles.
#[async_trait]
pub trait Input: Send + Sync {
    fn name(&self) -> &str;

    async fn get_items(&self, ctx: &ExecutionContext) -> anyhow::Result<Vec<Item>>;
}

// ---------------------------------------------------------------------------
// DirectoryInput
// ---------------------------------------------------------------------------

/// Recursive directory walk. Keys are the walked paths, sorted; a missing
/// root is an error, not an empty result. Directories named `.git` are not
/// descended into.
#[derive(Debug)]
pub struct DirectoryInput {
    root: PathBuf,
}

impl DirectoryInput {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Input for DirectoryInput {
    fn name(&self) -> &str {
        "directory"
    }

    async fn get_items(&self, _ctx: &ExecutionContext) -> anyhow::Result<Vec<Item>> {
        if !self.root.is_dir() {
            bail!("input directory {} does not exist", self.root.display());
        }
        let mut keys = Vec::new();
        collect_files(&self.root, &mut keys)
            .with_context(|| format!("walking input directory {}", self.root.display()))?;
        keys.sort();
        Ok(keys.into_iter().map(Item::new).collect())
    }
}

fn collect_files(dir: &Path, keys: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            collect_files(&path, keys)?;
        } else {
            keys.push(path.to_string_lossy().into_owned());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// InlineInput
// ---------------------------------------------------------------------------

/// Fixed key list from configuration.
#[derive(Debug)]
pub struct InlineInput {
    keys: Vec<String>,
}

impl InlineInput {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl Input for InlineInput {
    fn name(&self) -> &str {
        "inline"
    }

    async fn get_items(&self, _ctx: &ExecutionContext) -> anyhow::Result<Vec<Item>> {
        Ok(self.keys.iter().cloned().map(Item::new).collect())
    }
}

// ---------------------------------------------------------------------------
// ScriptInput
// ---------------------------------------------------------------------------

/// Items from an external script's stdout.
///
/// The script prints a JSON array whose entries are either bare key strings
/// or `{key, extra_data}` objects. A non-zero exit or malformed output is
/// fatal; partial results are never synthesized.
#[derive(Debug)]
pub struct ScriptInput {
    script: ScriptSpec,
}

impl ScriptInput {
    pub fn new(script: ScriptSpec) -> Self {
        Self { script }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ItemEntry {
    Key(String),
    Full {
        key: String,
        #[serde(default)]
        extra_data: Option<BTreeMap<String, serde_json::Value>>,
    },
}

#[async_trait]
impl Input for ScriptInput {
    fn name(&self) -> &str {
        "script"
    }

    async fn get_items(&self, _ctx: &ExecutionContext) -> anyhow::Result<Vec<Item>> {
        let args = self.script.args_for_keys(&[]);
        let output = self
            .script
            .run(&args)
            .await?
            .expect_success(&self.script.command_line())?;
        let entries: Vec<ItemEntry> = serde_json::from_str(output.stdout.trim())
            .with_context(|| {
                format!(
                    "script input {} emitted invalid JSON",
                    self.script.command_line()
                )
            })?;
        Ok(entries
            .into_iter()
            .map(|entry| match entry {
                ItemEntry::Key(key) => Item::new(key),
                ItemEntry::Full { key, extra_data } => Item { key, extra_data },
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// TargetedInput
// ---------------------------------------------------------------------------

/// Decorator attaching a computed `target_path` extra to every inner item
/// by rewriting a key prefix. Keys outside the prefix map to themselves.
pub struct TargetedInput {
    inner: Box<dyn Input>,
    from_prefix: String,
    to_prefix: String,
}

impl TargetedInput {
    pub fn new(
        inner: Box<dyn Input>,
        from_prefix: impl Into<String>,
        to_prefix: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            from_prefix: from_prefix.into(),
            to_prefix: to_prefix.into(),
        }
    }
}

#[async_trait]
impl Input for TargetedInput {
    fn name(&self) -> &str {
        "targeted"
    }

    async fn get_items(&self, ctx: &ExecutionContext) -> anyhow::Result<Vec<Item>> {
        let items = self.inner.get_items(ctx).await?;
        Ok(items
            .into_iter()
            .map(|item| {
                let target = match item.key.strip_prefix(&self.from_prefix) {
                    Some(rest) => format!("{}{rest}", self.to_prefix),
                    None => item.key.clone(),
                };
                item.with_extra(TARGET_PATH_KEY, json!(target))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_input_sorts_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), "a").unwrap();

        let ctx = ExecutionContext::new();
        let input = DirectoryInput::new(dir.path());
        let items = input.get_items(&ctx).await.unwrap();
        let keys: Vec<&str> = items.iter().map(|item| item.key.as_str()).collect();

        assert_eq!(keys.len(), 2);
        assert!(keys[0] < keys[1]);
        assert!(keys.iter().any(|k| k.ends_with("b.txt")));
        assert!(keys.iter().any(|k| k.ends_with("sub/a.txt")));
    }

    #[tokio::test]
    async fn test_directory_input_missing_root_is_an_error() {
        let ctx = ExecutionContext::new();
        let input = DirectoryInput::new("/no/such/longshore/root");
        assert!(input.get_items(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_script_input_parses_both_entry_shapes() {
        let script = ScriptSpec::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"printf '["plain.py", {"key": "rich.py", "extra_data": {"ticket": "LS-9"}}]'"#
                .to_string(),
        ]);
        let ctx = ExecutionContext::new();
        let items = ScriptInput::new(script).get_items(&ctx).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Item::new("plain.py"));
        assert_eq!(items[1].key, "rich.py");
        assert_eq!(items[1].extra("ticket"), Some(&json!("LS-9")));
    }

    #[tokio::test]
    async fn test_script_input_bad_json_is_fatal() {
        let script = ScriptSpec::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "printf '{broken'".to_string(),
        ]);
        let ctx = ExecutionContext::new();
        let err = ScriptInput::new(script).get_items(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[tokio::test]
    async fn test_targeted_input_rewrites_prefix() {
        let inner = InlineInput::new(vec!["src/a.rs".to_string(), "docs/b.md".to_string()]);
        let input = TargetedInput::new(Box::new(inner), "src/", "generated/");
        let ctx = ExecutionContext::new();
        let items = input.get_items(&ctx).await.unwrap();

        assert_eq!(items[0].extra(TARGET_PATH_KEY), Some(&json!("generated/a.rs")));
        assert_eq!(items[1].extra(TARGET_PATH_KEY), Some(&json!("docs/b.md")));
    }
}
