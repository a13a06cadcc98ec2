//! In-memory fakes for exercising pipelines without a working tree.
//!
//! [`MemoryRepo`] journals every repo call it receives, so tests can assert
//! ordering (clean before transform, rewind after submit) as well as
//! outcomes. [`RecordingEventHandler`] captures emitted events verbatim.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::batch::Batch;
use crate::change::{Change, ChangeState};
use crate::context::ExecutionContext;
use crate::events::{EventHandler, PipelineEvent};
use crate::repo::Repo;
use crate::transformer::TransformResult;

#[derive(Default)]
struct MemoryState {
    changes: Vec<Change>,
    outstanding_titles: Vec<String>,
    calls: Vec<String>,
    next_id: usize,
}

/// Repo fake backed by plain vectors behind a mutex.
pub struct MemoryRepo {
    state: Mutex<MemoryState>,
    has_changes: bool,
    submit_error: Option<String>,
    rewind_error: Option<String>,
}

impl Default for MemoryRepo {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            has_changes: true,
            submit_error: None,
            rewind_error: None,
        }
    }
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the answer `has_changes` gives for every batch.
    pub fn with_has_changes(mut self, has_changes: bool) -> Self {
        self.has_changes = has_changes;
        self
    }

    /// Makes every `submit` fail with this message.
    pub fn with_submit_error(mut self, message: impl Into<String>) -> Self {
        self.submit_error = Some(message.into());
        self
    }

    /// Makes every `rewind` fail with this message.
    pub fn with_rewind_error(mut self, message: impl Into<String>) -> Self {
        self.rewind_error = Some(message.into());
        self
    }

    /// Marks a batch title as having an unresolved change from a prior run.
    pub fn mark_outstanding(&self, title: impl Into<String>) {
        self.state.lock().unwrap().outstanding_titles.push(title.into());
    }

    /// Seeds a tracked change directly.
    pub fn insert_change(&self, change: Change) {
        self.state.lock().unwrap().changes.push(change);
    }

    /// Every repo call so far, in order, as `name:detail` strings.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Snapshot of all tracked changes.
    pub fn changes(&self) -> Vec<Change> {
        self.state.lock().unwrap().changes.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl Repo for MemoryRepo {
    fn name(&self) -> &str {
        "memory"
    }

    async fn clean(&self, _ctx: &ExecutionContext, batch: &Batch) -> anyhow::Result<()> {
        self.record(format!("clean:{}", batch.title));
        Ok(())
    }

    async fn rewind(&self, _ctx: &ExecutionContext, batch: &Batch) -> anyhow::Result<()> {
        self.record(format!("rewind:{}", batch.title));
        if let Some(message) = &self.rewind_error {
            anyhow::bail!("{message}");
        }
        Ok(())
    }

    async fn has_changes(&self, _ctx: &ExecutionContext, batch: &Batch) -> anyhow::Result<bool> {
        self.record(format!("has_changes:{}", batch.title));
        Ok(self.has_changes)
    }

    async fn has_outstanding_change(
        &self,
        _ctx: &ExecutionContext,
        batch: &Batch,
    ) -> anyhow::Result<bool> {
        self.record(format!("has_outstanding_change:{}", batch.title));
        Ok(self
            .state
            .lock()
            .unwrap()
            .outstanding_titles
            .contains(&batch.title))
    }

    async fn submit(
        &self,
        ctx: &ExecutionContext,
        batch: &Batch,
        _result: &TransformResult,
        existing: Option<&Change>,
    ) -> anyhow::Result<Change> {
        if let Some(message) = &self.submit_error {
            self.record(format!("submit_failed:{}", batch.title));
            anyhow::bail!("{message}");
        }
        if let Some(existing) = existing {
            self.record(format!("submit_update:{}", existing.id));
            return Ok(existing.clone());
        }
        let mut state = self.state.lock().unwrap();
        let id = format!("memory/{}", state.next_id);
        state.next_id += 1;
        let change = Change {
            id,
            state: ChangeState::Open,
            schema: ctx.schema().unwrap_or("unknown").to_string(),
            batch_title: batch.title.clone(),
            created_at: Utc::now(),
        };
        state.changes.push(change.clone());
        state.calls.push(format!("submit:{}", batch.title));
        Ok(change)
    }

    async fn outstanding_changes(&self, _ctx: &ExecutionContext) -> anyhow::Result<Vec<Change>> {
        self.record("outstanding_changes".to_string());
        Ok(self
            .state
            .lock()
            .unwrap()
            .changes
            .iter()
            .filter(|change| !change.state.is_resolved())
            .cloned()
            .collect())
    }

    async fn abandon(&self, _ctx: &ExecutionContext, change: &Change) -> anyhow::Result<()> {
        self.record(format!("abandon:{}", change.id));
        let mut state = self.state.lock().unwrap();
        for tracked in &mut state.changes {
            if tracked.id == change.id {
                tracked.state = ChangeState::Closed;
            }
        }
        Ok(())
    }

    async fn merge(&self, _ctx: &ExecutionContext, change: &Change) -> anyhow::Result<()> {
        self.record(format!("merge:{}", change.id));
        let mut state = self.state.lock().unwrap();
        for tracked in &mut state.changes {
            if tracked.id == change.id {
                tracked.state = ChangeState::Merged;
            }
        }
        Ok(())
    }

    async fn add_reviewers(
        &self,
        _ctx: &ExecutionContext,
        change: &Change,
        reviewers: &[String],
    ) -> anyhow::Result<()> {
        self.record(format!("add_reviewers:{}:{}", change.id, reviewers.join(",")));
        Ok(())
    }
}

/// Event handler that stores everything it sees.
#[derive(Default)]
pub struct RecordingEventHandler {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventHandler for RecordingEventHandler {
    fn handle(&self, event: &PipelineEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;

    #[tokio::test]
    async fn test_memory_repo_journals_calls() {
        let repo = MemoryRepo::new();
        let ctx = ExecutionContext::new().for_schema("docs");
        let batch = Batch::new("fixups").with_items(vec![Item::new("a.py")]);
        let result = TransformResult::new("regex", serde_json::json!({}));

        repo.clean(&ctx, &batch).await.unwrap();
        let change = repo.submit(&ctx, &batch, &result, None).await.unwrap();
        repo.rewind(&ctx, &batch).await.unwrap();

        assert_eq!(change.id, "memory/0");
        assert_eq!(change.schema, "docs");
        assert_eq!(
            repo.calls(),
            vec!["clean:fixups", "submit:fixups", "rewind:fixups"]
        );
    }

    #[tokio::test]
    async fn test_outstanding_changes_skip_resolved() {
        let repo = MemoryRepo::new();
        let ctx = ExecutionContext::new().for_schema("docs");
        let batch = Batch::new("fixups");
        let result = TransformResult::new("regex", serde_json::json!({}));

        let open = repo.submit(&ctx, &batch, &result, None).await.unwrap();
        let merged = repo.submit(&ctx, &batch, &result, None).await.unwrap();
        repo.merge(&ctx, &merged).await.unwrap();

        let outstanding = repo.outstanding_changes(&ctx).await.unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].id, open.id);
    }
}
