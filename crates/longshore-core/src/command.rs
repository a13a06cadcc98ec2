//! Side-effect hooks around validation.

use async_trait::async_trait;

use crate::batch::Batch;
use crate::context::ExecutionContext;
use crate::script::ScriptSpec;
use crate::transformer::TransformResult;

/// Post-transform side effect (code formatting, artifact regeneration).
///
/// `run_pre_validation` is a static classification: pre-validation commands
/// run in list order before the validators, the rest in list order after
/// them. A failing command aborts the batch; the pipeline does not roll
/// back side effects of commands that already ran, beyond the repo rewind.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    fn run_pre_validation(&self) -> bool {
        false
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        batch: &Batch,
        result: &TransformResult,
    ) -> anyhow::Result<()>;
}

/// Script-backed command with the shared placeholder expansion. A non-zero
/// exit is fatal.
#[derive(Debug)]
pub struct ScriptCommand {
    script: ScriptSpec,
    pre_validation: bool,
}

impl ScriptCommand {
    pub fn new(script: ScriptSpec) -> Self {
        Self {
            script,
            pre_validation: false,
        }
    }

    pub fn pre_validation(mut self) -> Self {
        self.pre_validation = true;
        self
    }
}

#[async_trait]
impl Command for ScriptCommand {
    fn name(&self) -> &str {
        "script"
    }

    fn run_pre_validation(&self) -> bool {
        self.pre_validation
    }

    async fn run(
        &self,
        _ctx: &ExecutionContext,
        batch: &Batch,
        _result: &TransformResult,
    ) -> anyhow::Result<()> {
        let args = self.script.args_for_batch(batch)?;
        self.script
            .run(&args)
            .await?
            .expect_success(&self.script.command_line())?;
        Ok(())
    }
}
