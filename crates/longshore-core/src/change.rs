//! Review-object records produced by repo submission.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a submitted change.
///
/// `Open`, `Approved`, and `ChangesRequested` are unresolved and still
/// subject to manager policy; `Closed` and `Merged` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeState {
    Open,
    Approved,
    ChangesRequested,
    Closed,
    Merged,
}

impl ChangeState {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ChangeState::Closed | ChangeState::Merged)
    }
}

impl fmt::Display for ChangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeState::Open => "open",
            ChangeState::Approved => "approved",
            ChangeState::ChangesRequested => "changes_requested",
            ChangeState::Closed => "closed",
            ChangeState::Merged => "merged",
        };
        write!(f, "{label}")
    }
}

/// A submitted review object tracked across runs.
///
/// Created by [`crate::repo::Repo::submit`]; enumerated by the manager and
/// matched back to its batch by `(schema, batch_title)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Stable reference understood by the owning repo (branch name, PR id).
    pub id: String,
    pub state: ChangeState,
    /// Name of the schema that produced this change.
    pub schema: String,
    /// Title of the batch this change carries.
    pub batch_title: String,
    pub created_at: DateTime<Utc>,
}

impl Change {
    /// Whole hours since submission, clamped at zero.
    pub fn age_hours(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_hours().max(0)
    }
}
