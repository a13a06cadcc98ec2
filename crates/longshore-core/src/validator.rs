//! Post-transform validation components.

use async_trait::async_trait;
use serde_json::json;

use crate::batch::Batch;
use crate::context::ExecutionContext;
use crate::script::ScriptSpec;
use crate::transformer::TransformResult;
use crate::validation::{ValidationLevel, ValidationResult};

/// Checks the transformed tree and reports a leveled result.
///
/// Validators must not mutate state. Returning a result is the normal path
/// even for failures the schema will gate on; an `Err` is reserved for the
/// validator itself breaking (spawn failure, timeout) and aborts the batch
/// without a result.
#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    async fn check(
        &self,
        ctx: &ExecutionContext,
        batch: &Batch,
        result: &TransformResult,
    ) -> anyhow::Result<ValidationResult>;
}

/// Script-backed validation: exit zero passes, non-zero reports at the
/// configured failure level with stderr as the message.
#[derive(Debug)]
pub struct ScriptValidator {
    script: ScriptSpec,
    failure_level: ValidationLevel,
}

impl ScriptValidator {
    pub fn new(script: ScriptSpec) -> Self {
        Self {
            script,
            failure_level: ValidationLevel::Error,
        }
    }

    pub fn with_failure_level(mut self, level: ValidationLevel) -> Self {
        self.failure_level = level;
        self
    }
}

#[async_trait]
impl Validator for ScriptValidator {
    fn name(&self) -> &str {
        "script"
    }

    async fn check(
        &self,
        _ctx: &ExecutionContext,
        batch: &Batch,
        _result: &TransformResult,
    ) -> anyhow::Result<ValidationResult> {
        let args = self.script.args_for_batch(batch)?;
        let output = self.script.run(&args).await?;
        if output.success() {
            return Ok(ValidationResult::passing(format!(
                "{} passed",
                self.script.command_line()
            )));
        }
        let message = if output.stderr.is_empty() {
            format!(
                "{} exited with status {}",
                self.script.command_line(),
                output.status
            )
        } else {
            output.stderr.clone()
        };
        Ok(ValidationResult::new(self.failure_level, message).with_detail(json!({
            "command": self.script.command_line(),
            "status": output.status,
            "stderr": output.stderr,
        })))
    }
}
