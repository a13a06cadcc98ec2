//! Structured pipeline events.
//!
//! The core emits a [`PipelineEvent`] at every significant point of a run.
//! Where events go is the handler's business: the default
//! [`TracingEventHandler`] forwards them to the `tracing` subscriber as
//! structured records, and tests swap in a recording sink.

use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Severity attached to a pipeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Debug,
    Verbose,
    Info,
    Warning,
    Error,
}

/// Events emitted by schema runs, the scheduler, and the manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        schema: String,
        run_id: String,
    },
    RunFinished {
        schema: String,
        run_id: String,
        submitted: usize,
        duration_ms: u64,
    },
    BatchSubmitted {
        schema: String,
        batch: String,
        change: String,
        updated: bool,
    },
    /// A batch was passed over without running its transformer.
    BatchSkipped {
        schema: String,
        batch: String,
        reason: String,
    },
    BatchAbandoned {
        schema: String,
        batch: String,
        change: String,
    },
    BatchFailed {
        schema: String,
        batch: String,
        error: String,
    },
    ScheduleFired {
        schema: String,
        shard: Option<u32>,
    },
    ScheduleSkipped {
        schema: String,
        reason: String,
    },
    ChangeActioned {
        change: String,
        action: String,
        step: String,
    },
    Message {
        level: EventLevel,
        text: String,
    },
}

impl PipelineEvent {
    /// Severity used by handlers that filter.
    pub fn level(&self) -> EventLevel {
        match self {
            PipelineEvent::RunStarted { .. }
            | PipelineEvent::RunFinished { .. }
            | PipelineEvent::BatchSubmitted { .. }
            | PipelineEvent::BatchAbandoned { .. }
            | PipelineEvent::ScheduleFired { .. }
            | PipelineEvent::ChangeActioned { .. } => EventLevel::Info,
            PipelineEvent::BatchSkipped { .. } | PipelineEvent::ScheduleSkipped { .. } => {
                EventLevel::Verbose
            }
            PipelineEvent::BatchFailed { .. } => EventLevel::Error,
            PipelineEvent::Message { level, .. } => *level,
        }
    }
}

/// Sink for pipeline events.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &PipelineEvent);
}

/// Default sink: forwards events to `tracing` with dotted event names.
#[derive(Debug, Default, Clone)]
pub struct TracingEventHandler;

impl EventHandler for TracingEventHandler {
    fn handle(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { schema, run_id } => {
                info!(event = "run.started", schema = %schema, run_id = %run_id);
            }
            PipelineEvent::RunFinished {
                schema,
                run_id,
                submitted,
                duration_ms,
            } => {
                info!(
                    event = "run.finished",
                    schema = %schema,
                    run_id = %run_id,
                    submitted = submitted,
                    duration_ms = duration_ms,
                );
            }
            PipelineEvent::BatchSubmitted {
                schema,
                batch,
                change,
                updated,
            } => {
                info!(
                    event = "batch.submitted",
                    schema = %schema,
                    batch = %batch,
                    change = %change,
                    updated = updated,
                );
            }
            PipelineEvent::BatchSkipped {
                schema,
                batch,
                reason,
            } => {
                debug!(event = "batch.skipped", schema = %schema, batch = %batch, reason = %reason);
            }
            PipelineEvent::BatchAbandoned {
                schema,
                batch,
                change,
            } => {
                info!(event = "batch.abandoned", schema = %schema, batch = %batch, change = %change);
            }
            PipelineEvent::BatchFailed {
                schema,
                batch,
                error,
            } => {
                error!(event = "batch.failed", schema = %schema, batch = %batch, error = %error);
            }
            PipelineEvent::ScheduleFired { schema, shard } => {
                info!(event = "schedule.fired", schema = %schema, shard = ?shard);
            }
            PipelineEvent::ScheduleSkipped { schema, reason } => {
                debug!(event = "schedule.skipped", schema = %schema, reason = %reason);
            }
            PipelineEvent::ChangeActioned {
                change,
                action,
                step,
            } => {
                info!(event = "change.actioned", change = %change, action = %action, step = %step);
            }
            PipelineEvent::Message { level, text } => match level {
                EventLevel::Error => error!(event = "message", text = %text),
                EventLevel::Warning => warn!(event = "message", text = %text),
                EventLevel::Info => info!(event = "message", text = %text),
                EventLevel::Verbose | EventLevel::Debug => debug!(event = "message", text = %text),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_levels() {
        let submitted = PipelineEvent::BatchSubmitted {
            schema: "docs".to_string(),
            batch: "fixups".to_string(),
            change: "longshore/docs/fixups-0".to_string(),
            updated: false,
        };
        assert_eq!(submitted.level(), EventLevel::Info);

        let failed = PipelineEvent::BatchFailed {
            schema: "docs".to_string(),
            batch: "fixups".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(failed.level(), EventLevel::Error);

        let skipped = PipelineEvent::BatchSkipped {
            schema: "docs".to_string(),
            batch: "fixups".to_string(),
            reason: "outstanding change".to_string(),
        };
        assert_eq!(skipped.level(), EventLevel::Verbose);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = PipelineEvent::ScheduleFired {
            schema: "docs".to_string(),
            shard: Some(2),
        };
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["event"], "schedule_fired");
        assert_eq!(encoded["shard"], 2);
    }
}
