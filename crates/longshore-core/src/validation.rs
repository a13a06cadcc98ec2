//! Validation severity levels and the gate error raised when a result
//! exceeds a schema's allowed level.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a validation result.
///
/// The derived order is the gate order: `None < Low < Warning < Error`.
/// A schema aborts a batch at the first result whose level exceeds its
/// `allowed_validation_level`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    /// The check passed, nothing to report.
    #[default]
    None,
    Low,
    Warning,
    Error,
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValidationLevel::None => "none",
            ValidationLevel::Low => "low",
            ValidationLevel::Warning => "warning",
            ValidationLevel::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// Outcome of one validator check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub level: ValidationLevel,
    pub message: String,
    /// Structured payload for tooling (offending status, stderr excerpt).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ValidationResult {
    pub fn new(level: ValidationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            detail: None,
        }
    }

    /// A passing result at level `None`.
    pub fn passing(message: impl Into<String>) -> Self {
        Self::new(ValidationLevel::None, message)
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Raised when a validator's result exceeds the schema's allowed level.
///
/// Fatal to the batch that produced it and propagated out of the run.
/// Carries the offending result so callers can downcast and inspect the
/// level, message, and detail.
#[derive(Debug, Clone, thiserror::Error)]
#[error("validator {validator} reported {}: {}", .result.level, .result.message)]
pub struct ValidationError {
    /// Name of the validator that produced the result.
    pub validator: String,
    /// The offending result.
    pub result: ValidationResult,
}
