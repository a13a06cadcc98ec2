//! Outstanding-change lifecycle management.
//!
//! The manager polls a repo for outstanding changes and walks each one
//! through an ordered list of policy steps. Steps only inspect; the manager
//! executes whatever actions they decide on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::{Change, ChangeState};
use crate::context::ExecutionContext;
use crate::events::PipelineEvent;
use crate::repo::Repo;
use crate::runner::Runner;

// ---------------------------------------------------------------------------
// Actions and steps
// ---------------------------------------------------------------------------

/// What to do with an outstanding change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Leave the change alone.
    None,
    /// Close the change without landing it.
    Abandon,
    /// Re-run the owning schema against the change to refresh it.
    Update,
    /// Land the change.
    Merge,
    AddReviewers { reviewers: Vec<String> },
}

impl Action {
    pub fn is_none(&self) -> bool {
        matches!(self, Action::None)
    }

    /// Stable label for events and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Action::None => "none",
            Action::Abandon => "abandon",
            Action::Update => "update",
            Action::Merge => "merge",
            Action::AddReviewers { .. } => "add_reviewers",
        }
    }
}

/// One policy's verdict for one change.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDecision {
    pub action: Action,
    /// When set, later steps are not evaluated for this change.
    pub stop_steps: bool,
}

impl StepDecision {
    pub fn none() -> Self {
        Self {
            action: Action::None,
            stop_steps: false,
        }
    }
}

/// A manager policy, evaluated against each outstanding change in declared
/// order. Evaluation is pure inspection; execution belongs to the manager.
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, change: &Change, now: DateTime<Utc>) -> StepDecision;
}

/// Fires an action when a change sits in a given state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleStep {
    pub when_state: ChangeState,
    pub action: Action,
    #[serde(default)]
    pub stop_steps: bool,
}

impl Step for RuleStep {
    fn name(&self) -> &str {
        "rule"
    }

    fn evaluate(&self, change: &Change, _now: DateTime<Utc>) -> StepDecision {
        if change.state == self.when_state {
            StepDecision {
                action: self.action.clone(),
                stop_steps: self.stop_steps,
            }
        } else {
            StepDecision::none()
        }
    }
}

/// Fires an action on changes older than a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleChangeStep {
    pub older_than_hours: i64,
    pub action: Action,
    #[serde(default)]
    pub stop_steps: bool,
}

impl Step for StaleChangeStep {
    fn name(&self) -> &str {
        "stale"
    }

    fn evaluate(&self, change: &Change, now: DateTime<Utc>) -> StepDecision {
        if change.age_hours(now) >= self.older_than_hours {
            StepDecision {
                action: self.action.clone(),
                stop_steps: self.stop_steps,
            }
        } else {
            StepDecision::none()
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Record of one executed action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    pub change: String,
    pub step: String,
    pub action: Action,
}

/// Result of one manager pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManageReport {
    pub reviewed: usize,
    pub actions: Vec<ActionRecord>,
}

/// Applies ordered policy steps to every outstanding change.
pub struct Manager {
    repo: Arc<dyn Repo>,
    steps: Vec<Box<dyn Step>>,
}

impl Manager {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self {
            repo,
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: Box<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// One pass over the outstanding changes.
    ///
    /// Every non-`None` action executes as soon as its step decides it; a
    /// decision with `stop_steps` ends that change's evaluation. Action
    /// failures propagate and end the pass.
    pub async fn run(
        &self,
        ctx: &ExecutionContext,
        runner: &mut Runner,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ManageReport> {
        let changes = self.repo.outstanding_changes(ctx).await?;
        let mut report = ManageReport {
            reviewed: changes.len(),
            actions: Vec::new(),
        };

        for change in &changes {
            for step in &self.steps {
                let decision = step.evaluate(change, now);
                if !decision.action.is_none() {
                    self.apply(ctx, runner, change, &decision.action).await?;
                    ctx.emit(PipelineEvent::ChangeActioned {
                        change: change.id.clone(),
                        action: decision.action.label().to_string(),
                        step: step.name().to_string(),
                    });
                    report.actions.push(ActionRecord {
                        change: change.id.clone(),
                        step: step.name().to_string(),
                        action: decision.action.clone(),
                    });
                }
                if decision.stop_steps {
                    break;
                }
            }
        }
        Ok(report)
    }

    async fn apply(
        &self,
        ctx: &ExecutionContext,
        runner: &mut Runner,
        change: &Change,
        action: &Action,
    ) -> anyhow::Result<()> {
        match action {
            Action::None => Ok(()),
            Action::Abandon => self.repo.abandon(ctx, change).await,
            Action::Merge => self.repo.merge(ctx, change).await,
            Action::AddReviewers { reviewers } => {
                self.repo.add_reviewers(ctx, change, reviewers).await
            }
            Action::Update => runner.update(ctx, change).await.map(|_| ()),
        }
    }
}
