//! Working-tree and review-object adapter.

use async_trait::async_trait;

use crate::batch::Batch;
use crate::change::Change;
use crate::context::ExecutionContext;
use crate::transformer::TransformResult;

/// Adapter between the pipeline and the underlying version control and
/// review system.
///
/// `clean` and `rewind` perform the same tree reset observed at different
/// points: `clean` before a batch starts (defense against leftover state
/// from an earlier crash) and `rewind` after the batch's outcome. Both must
/// leave the tree at the pre-batch baseline.
///
/// Submitting with an existing change updates that review object in place
/// instead of opening a new one.
#[async_trait]
pub trait Repo: Send + Sync {
    fn name(&self) -> &str;

    /// Reset the tree before a batch runs.
    async fn clean(&self, ctx: &ExecutionContext, batch: &Batch) -> anyhow::Result<()>;

    /// Reset the tree after a batch's outcome.
    async fn rewind(&self, ctx: &ExecutionContext, batch: &Batch) -> anyhow::Result<()>;

    /// Whether the transform and commands altered the tree.
    async fn has_changes(&self, ctx: &ExecutionContext, batch: &Batch) -> anyhow::Result<bool>;

    /// Whether a prior run's unresolved change exists for this batch.
    /// Consulted only when the pipeline is not updating an existing change.
    async fn has_outstanding_change(
        &self,
        ctx: &ExecutionContext,
        batch: &Batch,
    ) -> anyhow::Result<bool>;

    /// Commit the tree state and open (or, with `existing`, update) the
    /// review object carrying this batch.
    async fn submit(
        &self,
        ctx: &ExecutionContext,
        batch: &Batch,
        result: &TransformResult,
        existing: Option<&Change>,
    ) -> anyhow::Result<Change>;

    /// Unresolved changes this repo is tracking.
    async fn outstanding_changes(&self, ctx: &ExecutionContext) -> anyhow::Result<Vec<Change>>;

    async fn abandon(&self, ctx: &ExecutionContext, change: &Change) -> anyhow::Result<()>;

    async fn merge(&self, ctx: &ExecutionContext, change: &Change) -> anyhow::Result<()>;

    async fn add_reviewers(
        &self,
        ctx: &ExecutionContext,
        change: &Change,
        reviewers: &[String],
    ) -> anyhow::Result<()>;
}
