//! Working-tree transformation components.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::batch::Batch;
use crate::config::ConfigError;
use crate::context::ExecutionContext;
use crate::script::ScriptSpec;

/// Output of a transformer, handed to validators and commands untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResult {
    /// Name of the transformer that produced this result.
    pub transformer: String,
    /// Transformer-defined payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TransformResult {
    pub fn new(transformer: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            transformer: transformer.into(),
            payload,
        }
    }
}

/// Applies one batch's change to the working tree.
///
/// The pipeline runs a transformer at most once per batch and never
/// retries it. Idempotence over an already-transformed tree is each
/// implementation's own contract, not something the pipeline guarantees.
#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    async fn transform(
        &self,
        ctx: &ExecutionContext,
        batch: &Batch,
    ) -> anyhow::Result<TransformResult>;
}

// ---------------------------------------------------------------------------
// RegexTransformer
// ---------------------------------------------------------------------------

/// Regex find/replace over each item's file content.
///
/// Reads and writes go through the run's file cache, so later pipeline
/// steps observe the rewritten content without re-reading disk. A missing
/// file is an error.
#[derive(Debug)]
pub struct RegexTransformer {
    pattern: Regex,
    replacement: String,
}

impl RegexTransformer {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, ConfigError> {
        let pattern = Regex::new(pattern).map_err(|e| ConfigError::InvalidParams {
            component: "regex transformer".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            pattern,
            replacement: replacement.into(),
        })
    }
}

#[async_trait]
impl Transformer for RegexTransformer {
    fn name(&self) -> &str {
        "regex"
    }

    async fn transform(
        &self,
        ctx: &ExecutionContext,
        batch: &Batch,
    ) -> anyhow::Result<TransformResult> {
        let mut changed = Vec::new();
        let mut replacements = 0usize;
        for item in &batch.items {
            let before = ctx
                .files()
                .read(&item.key)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", item.key))?;
            let count = self.pattern.find_iter(&before).count();
            if count == 0 {
                continue;
            }
            let after = self.pattern.replace_all(&before, self.replacement.as_str());
            ctx.files()
                .write(&item.key, &after)
                .map_err(|e| anyhow::anyhow!("writing {}: {e}", item.key))?;
            replacements += count;
            changed.push(item.key.clone());
        }
        Ok(TransformResult::new(
            self.name(),
            json!({"files_changed": changed, "replacements": replacements}),
        ))
    }
}

// ---------------------------------------------------------------------------
// ScriptTransformer
// ---------------------------------------------------------------------------

/// Hands the batch to an external script.
///
/// The script writes files directly, outside the cache, so the whole cache
/// is invalidated after a successful run. A non-zero exit is fatal.
#[derive(Debug)]
pub struct ScriptTransformer {
    script: ScriptSpec,
}

impl ScriptTransformer {
    pub fn new(script: ScriptSpec) -> Self {
        Self { script }
    }
}

#[async_trait]
impl Transformer for ScriptTransformer {
    fn name(&self) -> &str {
        "script"
    }

    async fn transform(
        &self,
        ctx: &ExecutionContext,
        batch: &Batch,
    ) -> anyhow::Result<TransformResult> {
        let args = self.script.args_for_batch(batch)?;
        let output = self
            .script
            .run(&args)
            .await?
            .expect_success(&self.script.command_line())?;
        ctx.files().clear();
        Ok(TransformResult::new(
            self.name(),
            json!({
                "command": self.script.command_line(),
                "stdout": output.stdout.trim(),
            }),
        ))
    }
}
