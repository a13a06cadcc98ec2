//! Longshore Core Library
//!
//! Re-exports core components for programmatic access to Longshore
//! pipelines: schemas, their component traits, the scheduler, and the
//! outstanding-change manager.

pub mod batch;
pub mod batcher;
pub mod change;
pub mod command;
pub mod config;
pub mod context;
pub mod events;
pub mod fakes;
pub mod filter;
pub mod input;
pub mod item;
pub mod manager;
pub mod repo;
pub mod runner;
pub mod schema;
pub mod scheduler;
pub mod script;
pub mod telemetry;
pub mod transformer;
pub mod validation;
pub mod validator;

pub use batch::Batch;
pub use item::Item;

pub use batcher::{Batcher, DirectoryBatcher, RegexBatcher, SingleBatcher};
pub use command::{Command, ScriptCommand};
pub use filter::{
    shard_of, AggregateFilter, AggregateMode, Filter, InvertibleFilter, RegexFilter, ScriptFilter,
    ShardFilter,
};
pub use input::{
    DirectoryInput, InlineInput, Input, ScriptInput, TargetedInput, TARGET_PATH_KEY,
};
pub use transformer::{RegexTransformer, ScriptTransformer, TransformResult, Transformer};
pub use validator::{ScriptValidator, Validator};

pub use change::{Change, ChangeState};
pub use repo::Repo;

pub use schema::{BatchOutcome, BatchReport, Schema, SchemaConfig, SchemaRunReport};
pub use validation::{ValidationError, ValidationLevel, ValidationResult};

pub use manager::{
    Action, ActionRecord, ManageReport, Manager, RuleStep, StaleChangeStep, Step, StepDecision,
};
pub use runner::Runner;
pub use scheduler::{
    DueDecision, FireReport, FiredEntry, Repeats, Schedule, ScheduleError, ScheduledEntry,
    Scheduler, SchedulerSpec, ShardAssignment, ShardSpec, SkippedEntry, TimeBuckets,
};

pub use config::{ComponentKind, ComponentRegistry, ConfigError, ManagerSpec, SchemaSpec};
pub use context::{ExecutionContext, FileCache};
pub use events::{EventHandler, EventLevel, PipelineEvent, TracingEventHandler};
pub use script::{ScriptError, ScriptOutput, ScriptSpec, DEFAULT_SCRIPT_TIMEOUT_SECS};
pub use telemetry::init_tracing;

/// Longshore version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
