//! Repo backed by branches in a local git checkout.
//!
//! Each submitted batch becomes a branch named
//! `{prefix}{schema}/{title-slug}-{digest}` with the owning schema and batch
//! title recorded as commit trailers, so outstanding changes can be
//! reconstructed from the branch list alone. The working tree always returns
//! to the base branch between batches.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, warn};

use longshore_core::change::{Change, ChangeState};
use longshore_core::context::ExecutionContext;
use longshore_core::repo::Repo;
use longshore_core::transformer::TransformResult;
use longshore_core::Batch;

use crate::error::GitError;

const SCHEMA_TRAILER: &str = "Longshore-Schema:";
const BATCH_TRAILER: &str = "Longshore-Batch:";

/// Review-object repo over a local git working tree.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
    base_branch: String,
    branch_prefix: String,
}

impl GitRepo {
    pub fn new(path: impl Into<PathBuf>, base_branch: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            base_branch: base_branch.into(),
            branch_prefix: "longshore/".to_string(),
        }
    }

    pub fn with_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.branch_prefix = prefix.into();
        self
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    /// Runs git, failing on any non-zero exit. Returns stdout.
    async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| GitError::Spawn { source })?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Runs git where a non-zero exit is an answer, not a failure.
    async fn git_check(&self, args: &[&str]) -> Result<bool, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| GitError::Spawn { source })?;
        Ok(output.status.success())
    }

    /// Branch name carrying a given batch for the active schema.
    fn branch_ref(&self, ctx: &ExecutionContext, batch: &Batch) -> String {
        let schema = ctx.schema().unwrap_or("adhoc");
        let digest = Sha256::digest(format!("{schema}\0{}", batch.title).as_bytes());
        format!(
            "{}{}/{}-{}",
            self.branch_prefix,
            slugify(schema),
            slugify(&batch.title),
            hex::encode(&digest[..4])
        )
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        self.git_check(&["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .await
    }

    async fn is_merged(&self, branch: &str) -> Result<bool, GitError> {
        self.git_check(&["merge-base", "--is-ancestor", branch, &self.base_branch])
            .await
    }

    /// Puts the working tree back on the base branch with nothing staged,
    /// nothing modified, and nothing untracked.
    async fn restore_base(&self) -> Result<(), GitError> {
        self.git(&["checkout", "-f", &self.base_branch]).await?;
        self.git(&["reset", "--hard"]).await?;
        self.git(&["clean", "-fd"]).await?;
        Ok(())
    }

    async fn branch_created_at(&self, branch: &str) -> Result<DateTime<Utc>, GitError> {
        let stamp = self.git(&["log", "-1", "--format=%aI", branch]).await?;
        DateTime::parse_from_rfc3339(stamp.trim())
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|e| GitError::Parse {
                context: format!("author date of {branch}"),
                detail: e.to_string(),
            })
    }

    /// Reads the schema and batch trailers off a branch tip, if present.
    async fn branch_trailers(&self, branch: &str) -> Result<Option<(String, String)>, GitError> {
        let body = self.git(&["log", "-1", "--format=%B", branch]).await?;
        let mut schema = None;
        let mut title = None;
        for line in body.lines() {
            if let Some(value) = line.strip_prefix(SCHEMA_TRAILER) {
                schema = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix(BATCH_TRAILER) {
                title = Some(value.trim().to_string());
            }
        }
        Ok(schema.zip(title))
    }
}

#[async_trait]
impl Repo for GitRepo {
    fn name(&self) -> &str {
        "git"
    }

    async fn clean(&self, _ctx: &ExecutionContext, batch: &Batch) -> anyhow::Result<()> {
        debug!(batch = %batch.title, "restoring base branch");
        self.restore_base().await?;
        Ok(())
    }

    async fn rewind(&self, _ctx: &ExecutionContext, batch: &Batch) -> anyhow::Result<()> {
        debug!(batch = %batch.title, "rewinding to base branch");
        self.restore_base().await?;
        Ok(())
    }

    async fn has_changes(&self, _ctx: &ExecutionContext, _batch: &Batch) -> anyhow::Result<bool> {
        let status = self.git(&["status", "--porcelain"]).await?;
        Ok(!status.trim().is_empty())
    }

    async fn has_outstanding_change(
        &self,
        ctx: &ExecutionContext,
        batch: &Batch,
    ) -> anyhow::Result<bool> {
        let branch = self.branch_ref(ctx, batch);
        if !self.branch_exists(&branch).await? {
            return Ok(false);
        }
        Ok(!self.is_merged(&branch).await?)
    }

    async fn submit(
        &self,
        ctx: &ExecutionContext,
        batch: &Batch,
        _result: &TransformResult,
        existing: Option<&Change>,
    ) -> anyhow::Result<Change> {
        let branch = match existing {
            Some(change) => change.id.clone(),
            None => self.branch_ref(ctx, batch),
        };
        let schema = ctx.schema().unwrap_or("adhoc").to_string();
        let title = if batch.title.is_empty() {
            "automated change"
        } else {
            batch.title.as_str()
        };

        self.git(&["checkout", "-B", &branch]).await?;
        self.git(&["add", "-A"]).await?;
        let trailers = format!("{SCHEMA_TRAILER} {schema}\n{BATCH_TRAILER} {}", batch.title);
        self.git(&["commit", "-m", title, "-m", &trailers]).await?;

        let created_at = match existing {
            Some(change) => change.created_at,
            None => self.branch_created_at(&branch).await?,
        };
        Ok(Change {
            id: branch,
            state: ChangeState::Open,
            schema,
            batch_title: batch.title.clone(),
            created_at,
        })
    }

    async fn outstanding_changes(&self, _ctx: &ExecutionContext) -> anyhow::Result<Vec<Change>> {
        let listing = self
            .git(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])
            .await?;
        let mut changes = Vec::new();
        for branch in listing.lines() {
            let branch = branch.trim();
            if !branch.starts_with(&self.branch_prefix) {
                continue;
            }
            let Some((schema, batch_title)) = self.branch_trailers(branch).await? else {
                debug!(branch, "skipping branch without longshore trailers");
                continue;
            };
            if self.is_merged(branch).await? {
                continue;
            }
            changes.push(Change {
                id: branch.to_string(),
                state: ChangeState::Open,
                schema,
                batch_title,
                created_at: self.branch_created_at(branch).await?,
            });
        }
        Ok(changes)
    }

    async fn abandon(&self, _ctx: &ExecutionContext, change: &Change) -> anyhow::Result<()> {
        self.git(&["checkout", "-f", &self.base_branch]).await?;
        self.git(&["branch", "-D", &change.id]).await?;
        Ok(())
    }

    async fn merge(&self, _ctx: &ExecutionContext, change: &Change) -> anyhow::Result<()> {
        self.git(&["checkout", "-f", &self.base_branch]).await?;
        let message = format!("merge {}", change.batch_title);
        self.git(&["merge", "--no-ff", &change.id, "-m", &message])
            .await?;
        self.git(&["branch", "-D", &change.id]).await?;
        Ok(())
    }

    async fn add_reviewers(
        &self,
        _ctx: &ExecutionContext,
        change: &Change,
        reviewers: &[String],
    ) -> anyhow::Result<()> {
        warn!(
            change = %change.id,
            reviewers = %reviewers.join(","),
            "local git branches have no reviewer concept, ignoring"
        );
        Ok(())
    }
}

/// Lowercased, dash-separated form of a title, capped for branch-name use.
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "batch".to_string()
    } else {
        slug.chars().take(40).collect()
    }
}
