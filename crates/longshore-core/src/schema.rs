//! The schema execution pipeline.
//!
//! A [`Schema`] wires one input, ordered filters, one batcher, one
//! transformer, ordered validators, ordered commands, and a repo into the
//! run sequence: discover, filter, batch, then per batch clean, transform,
//! validate, and submit.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::batch::Batch;
use crate::batcher::Batcher;
use crate::change::Change;
use crate::context::ExecutionContext;
use crate::events::PipelineEvent;
use crate::filter::InvertibleFilter;
use crate::input::Input;
use crate::item::Item;
use crate::repo::Repo;
use crate::transformer::Transformer;
use crate::validation::{ValidationError, ValidationLevel};
use crate::validator::Validator;

// ---------------------------------------------------------------------------
// Configuration and reports
// ---------------------------------------------------------------------------

/// Knobs for one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub name: String,
    /// Highest validation level tolerated before a batch aborts.
    #[serde(default)]
    pub allowed_validation_level: ValidationLevel,
    /// Stop a run after this many submissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_submissions: Option<usize>,
}

impl SchemaConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allowed_validation_level: ValidationLevel::None,
            max_submissions: None,
        }
    }

    pub fn with_allowed_validation_level(mut self, level: ValidationLevel) -> Self {
        self.allowed_validation_level = level;
        self
    }

    pub fn with_max_submissions(mut self, max: usize) -> Self {
        self.max_submissions = Some(max);
        self
    }
}

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// A change was created or updated and the tree rewound.
    Submitted { change: Change, updated: bool },
    /// An unresolved change already covers this batch; the transformer
    /// never ran.
    SkippedOutstanding,
    /// The transform produced no tree changes. Carries the change that was
    /// abandoned when this batch previously had one.
    NoChanges { abandoned: Option<Change> },
}

impl BatchOutcome {
    pub fn submitted(&self) -> bool {
        matches!(self, BatchOutcome::Submitted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub title: String,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

/// Result of one full schema run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaRunReport {
    pub schema: String,
    pub run_id: String,
    pub batches: Vec<BatchReport>,
    pub submitted: usize,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// One configured pipeline: components plus the repo they run against.
pub struct Schema {
    config: SchemaConfig,
    input: Box<dyn Input>,
    filters: Vec<InvertibleFilter>,
    batcher: Box<dyn Batcher>,
    transformer: Box<dyn Transformer>,
    validators: Vec<Box<dyn Validator>>,
    commands: Vec<Box<dyn crate::command::Command>>,
    repo: Arc<dyn Repo>,
}

impl Schema {
    pub fn new(
        config: SchemaConfig,
        input: Box<dyn Input>,
        batcher: Box<dyn Batcher>,
        transformer: Box<dyn Transformer>,
        repo: Arc<dyn Repo>,
    ) -> Self {
        Self {
            config,
            input,
            filters: Vec::new(),
            batcher,
            transformer,
            validators: Vec::new(),
            commands: Vec::new(),
            repo,
        }
    }

    pub fn with_filter(mut self, filter: InvertibleFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn with_command(mut self, command: Box<dyn crate::command::Command>) -> Self {
        self.commands.push(command);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    pub fn repo(&self) -> Arc<dyn Repo> {
        Arc::clone(&self.repo)
    }

    /// Discover and filter the run's items.
    ///
    /// The input runs once; each filter's `prepare` then runs exactly once
    /// with the full candidate set before any evaluation. Items are kept
    /// when every filter accepts them, short-circuiting on the first
    /// excluding filter in declared order.
    pub async fn get_items(&mut self, ctx: &ExecutionContext) -> anyhow::Result<Vec<Item>> {
        let all = self.input.get_items(ctx).await?;
        for filter in &mut self.filters {
            filter.prepare(&all).await?;
        }
        let filters = &self.filters;
        Ok(all
            .into_iter()
            .filter(|item| filters.iter().all(|filter| filter.is_valid(item)))
            .collect())
    }

    /// Group eligible items; pure delegation to the batcher.
    pub fn get_batches(&self, items: Vec<Item>) -> anyhow::Result<Vec<Batch>> {
        self.batcher.batch(items)
    }

    /// Run the per-batch sequence against a clean tree.
    ///
    /// With `existing` set, the batch updates that change and the
    /// outstanding-change check is skipped. Any failure after the initial
    /// clean triggers a best-effort rewind: the rewind error, if any, is
    /// logged and the original error surfaces.
    pub async fn execute_batch(
        &self,
        ctx: &ExecutionContext,
        batch: &Batch,
        existing: Option<&Change>,
    ) -> anyhow::Result<BatchOutcome> {
        self.repo.clean(ctx, batch).await?;
        ctx.files().clear();

        if existing.is_none() && self.repo.has_outstanding_change(ctx, batch).await? {
            ctx.emit(PipelineEvent::BatchSkipped {
                schema: self.config.name.clone(),
                batch: batch.title.clone(),
                reason: "outstanding change".to_string(),
            });
            return Ok(BatchOutcome::SkippedOutstanding);
        }

        match self.process_batch(ctx, batch, existing).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(rewind_err) = self.repo.rewind(ctx, batch).await {
                    warn!(
                        batch = %batch.title,
                        error = %rewind_err,
                        "rewind after failed batch also failed"
                    );
                }
                ctx.files().clear();
                Err(err)
            }
        }
    }

    async fn process_batch(
        &self,
        ctx: &ExecutionContext,
        batch: &Batch,
        existing: Option<&Change>,
    ) -> anyhow::Result<BatchOutcome> {
        let result = self.transformer.transform(ctx, batch).await?;

        for command in self.commands.iter().filter(|c| c.run_pre_validation()) {
            command.run(ctx, batch, &result).await?;
        }

        for validator in &self.validators {
            let outcome = validator.check(ctx, batch, &result).await?;
            if outcome.level > self.config.allowed_validation_level {
                return Err(ValidationError {
                    validator: validator.name().to_string(),
                    result: outcome,
                }
                .into());
            }
        }

        for command in self.commands.iter().filter(|c| !c.run_pre_validation()) {
            command.run(ctx, batch, &result).await?;
        }

        if self.repo.has_changes(ctx, batch).await? {
            let change = self.repo.submit(ctx, batch, &result, existing).await?;
            self.repo.rewind(ctx, batch).await?;
            ctx.files().clear();
            ctx.emit(PipelineEvent::BatchSubmitted {
                schema: self.config.name.clone(),
                batch: batch.title.clone(),
                change: change.id.clone(),
                updated: existing.is_some(),
            });
            return Ok(BatchOutcome::Submitted {
                change,
                updated: existing.is_some(),
            });
        }

        let abandoned = match existing {
            Some(change) => {
                self.repo.abandon(ctx, change).await?;
                ctx.emit(PipelineEvent::BatchAbandoned {
                    schema: self.config.name.clone(),
                    batch: batch.title.clone(),
                    change: change.id.clone(),
                });
                Some(change.clone())
            }
            None => None,
        };
        self.repo.rewind(ctx, batch).await?;
        ctx.files().clear();
        Ok(BatchOutcome::NoChanges { abandoned })
    }

    /// Execute the whole schema: discover, batch, then run batches in order
    /// until done or the submission cap is reached. A batch error is
    /// reported and propagated; completed submissions stand.
    pub async fn run(&mut self, ctx: &ExecutionContext) -> anyhow::Result<SchemaRunReport> {
        let ctx = ctx.for_schema(self.config.name.clone());
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        ctx.emit(PipelineEvent::RunStarted {
            schema: self.config.name.clone(),
            run_id: run_id.clone(),
        });

        let items = self.get_items(&ctx).await?;
        let batches = self.get_batches(items)?;

        let mut reports = Vec::new();
        let mut submitted = 0usize;
        for batch in &batches {
            if let Some(max) = self.config.max_submissions {
                if submitted >= max {
                    ctx.emit(PipelineEvent::BatchSkipped {
                        schema: self.config.name.clone(),
                        batch: batch.title.clone(),
                        reason: format!("submission cap of {max} reached"),
                    });
                    break;
                }
            }
            let outcome = match self.execute_batch(&ctx, batch, None).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    ctx.emit(PipelineEvent::BatchFailed {
                        schema: self.config.name.clone(),
                        batch: batch.title.clone(),
                        error: format!("{err:#}"),
                    });
                    return Err(err);
                }
            };
            if outcome.submitted() {
                submitted += 1;
            }
            reports.push(BatchReport {
                title: batch.title.clone(),
                outcome,
            });
        }

        let report = SchemaRunReport {
            schema: self.config.name.clone(),
            run_id: run_id.clone(),
            batches: reports,
            submitted,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        ctx.emit(PipelineEvent::RunFinished {
            schema: self.config.name.clone(),
            run_id,
            submitted,
            duration_ms: report.duration_ms,
        });
        Ok(report)
    }

    /// Run once with an extra filter appended for this run only. The
    /// scheduler uses this to inject the rotation's shard filter.
    pub async fn run_with_filter(
        &mut self,
        ctx: &ExecutionContext,
        filter: InvertibleFilter,
    ) -> anyhow::Result<SchemaRunReport> {
        self.filters.push(filter);
        let result = self.run(ctx).await;
        self.filters.pop();
        result
    }

    /// Re-run for one outstanding change: re-derive batches and execute the
    /// one matching the change's batch title against it. A batch that no
    /// longer exists abandons the change.
    pub async fn update(
        &mut self,
        ctx: &ExecutionContext,
        change: &Change,
    ) -> anyhow::Result<BatchOutcome> {
        let ctx = ctx.for_schema(self.config.name.clone());
        let items = self.get_items(&ctx).await?;
        let batches = self.get_batches(items)?;

        match batches.iter().find(|b| b.title == change.batch_title) {
            Some(batch) => self.execute_batch(&ctx, batch, Some(change)).await,
            None => {
                self.repo.abandon(&ctx, change).await?;
                ctx.emit(PipelineEvent::BatchAbandoned {
                    schema: self.config.name.clone(),
                    batch: change.batch_title.clone(),
                    change: change.id.clone(),
                });
                Ok(BatchOutcome::NoChanges {
                    abandoned: Some(change.clone()),
                })
            }
        }
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("config", &self.config)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}
