//! Full pipeline tests over in-memory components: batch execution order,
//! validation gating, outstanding-change handling, scheduling, and
//! manager-driven lifecycle actions.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use longshore_core::fakes::{MemoryRepo, RecordingEventHandler};
use longshore_core::{
    Action, Batch, BatchOutcome, Change, ChangeState, Command, DirectoryBatcher, ExecutionContext,
    Filter, InlineInput, InvertibleFilter, Item, Manager, PipelineEvent, RegexFilter, RuleStep,
    Runner, Schedule, ScheduledEntry, Scheduler, SchedulerSpec, Schema, SchemaConfig,
    SingleBatcher, StaleChangeStep, TransformResult, Transformer, ValidationError, ValidationLevel,
    ValidationResult, Validator,
};

type Journal = Arc<Mutex<Vec<String>>>;

fn new_journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

// ---------------------------------------------------------------------------
// Test components
// ---------------------------------------------------------------------------

struct JournalingTransformer {
    journal: Journal,
}

#[async_trait]
impl Transformer for JournalingTransformer {
    fn name(&self) -> &str {
        "journal"
    }

    async fn transform(
        &self,
        _ctx: &ExecutionContext,
        batch: &Batch,
    ) -> anyhow::Result<TransformResult> {
        let keys: Vec<&str> = batch.keys().collect();
        self.journal
            .lock()
            .unwrap()
            .push(format!("transform:{}:{}", batch.title, keys.join("+")));
        Ok(TransformResult::new("journal", json!({"keys": keys})))
    }
}

struct FailingTransformer;

#[async_trait]
impl Transformer for FailingTransformer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn transform(
        &self,
        _ctx: &ExecutionContext,
        _batch: &Batch,
    ) -> anyhow::Result<TransformResult> {
        anyhow::bail!("transformer exploded")
    }
}

struct LevelValidator {
    label: String,
    level: ValidationLevel,
    journal: Journal,
}

impl LevelValidator {
    fn new(label: &str, level: ValidationLevel, journal: &Journal) -> Box<Self> {
        Box::new(Self {
            label: label.to_string(),
            level,
            journal: Arc::clone(journal),
        })
    }
}

#[async_trait]
impl Validator for LevelValidator {
    fn name(&self) -> &str {
        &self.label
    }

    async fn check(
        &self,
        _ctx: &ExecutionContext,
        _batch: &Batch,
        _result: &TransformResult,
    ) -> anyhow::Result<ValidationResult> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("validate:{}", self.label));
        Ok(ValidationResult::new(
            self.level,
            format!("{} finished", self.label),
        ))
    }
}

struct JournalingCommand {
    label: String,
    pre: bool,
    journal: Journal,
}

impl JournalingCommand {
    fn new(label: &str, pre: bool, journal: &Journal) -> Box<Self> {
        Box::new(Self {
            label: label.to_string(),
            pre,
            journal: Arc::clone(journal),
        })
    }
}

#[async_trait]
impl Command for JournalingCommand {
    fn name(&self) -> &str {
        &self.label
    }

    fn run_pre_validation(&self) -> bool {
        self.pre
    }

    async fn run(
        &self,
        _ctx: &ExecutionContext,
        _batch: &Batch,
        _result: &TransformResult,
    ) -> anyhow::Result<()> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("command:{}", self.label));
        Ok(())
    }
}

struct CountingFilter {
    prepared_with: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl Filter for CountingFilter {
    fn name(&self) -> &str {
        "counting"
    }

    async fn prepare(&mut self, items: &[Item]) -> anyhow::Result<()> {
        self.prepared_with.lock().unwrap().push(items.len());
        Ok(())
    }

    fn evaluate(&self, _item: &Item) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn recording_ctx() -> (ExecutionContext, Arc<RecordingEventHandler>) {
    let handler = Arc::new(RecordingEventHandler::new());
    let ctx = ExecutionContext::with_handler(handler.clone());
    (ctx, handler)
}

fn keys(strs: &[&str]) -> Vec<String> {
    strs.iter().map(|s| s.to_string()).collect()
}

fn sweep_schema(repo: Arc<MemoryRepo>, journal: &Journal) -> Schema {
    Schema::new(
        SchemaConfig::new("sweep"),
        Box::new(InlineInput::new(keys(&["a.py", "b.rs", "c.py"]))),
        Box::new(SingleBatcher::new("sweep")),
        Box::new(JournalingTransformer {
            journal: Arc::clone(journal),
        }),
        repo,
    )
    .with_filter(InvertibleFilter::new(Box::new(
        RegexFilter::new(r"\.py$").unwrap(),
    )))
}

// ---------------------------------------------------------------------------
// Batch execution
// ---------------------------------------------------------------------------

/// Test: a run discovers, filters, transforms, submits, and rewinds.
#[tokio::test]
async fn test_run_submits_and_rewinds() {
    let (ctx, handler) = recording_ctx();
    let journal = new_journal();
    let repo = Arc::new(MemoryRepo::new());
    let mut schema = sweep_schema(Arc::clone(&repo), &journal);

    let report = schema.run(&ctx).await.unwrap();

    assert_eq!(report.schema, "sweep");
    assert_eq!(report.submitted, 1);
    assert_eq!(report.batches.len(), 1);
    let BatchOutcome::Submitted { change, updated } = &report.batches[0].outcome else {
        panic!("expected a submission, got {:?}", report.batches[0].outcome);
    };
    assert!(!updated);
    assert_eq!(change.schema, "sweep");
    assert_eq!(change.batch_title, "sweep");
    assert_eq!(change.state, ChangeState::Open);

    // The filter kept only the .py items, and the tree was rewound after
    // the submission.
    assert_eq!(entries(&journal), vec!["transform:sweep:a.py+c.py"]);
    assert_eq!(
        repo.calls(),
        vec![
            "clean:sweep",
            "has_outstanding_change:sweep",
            "has_changes:sweep",
            "submit:sweep",
            "rewind:sweep",
        ]
    );

    let events = handler.events();
    assert!(matches!(events.first(), Some(PipelineEvent::RunStarted { schema, .. }) if schema == "sweep"));
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::BatchSubmitted { batch, updated: false, .. } if batch == "sweep"
    )));
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::RunFinished { submitted: 1, .. })
    ));
}

/// Test: every filter's prepare sees the full candidate set, before any
/// filtering has removed items.
#[tokio::test]
async fn test_filter_prepare_gets_full_candidate_set() {
    let ctx = ExecutionContext::new();
    let journal = new_journal();
    let prepared_with = Arc::new(Mutex::new(Vec::new()));
    let mut schema = sweep_schema(Arc::new(MemoryRepo::new()), &journal).with_filter(
        InvertibleFilter::new(Box::new(CountingFilter {
            prepared_with: Arc::clone(&prepared_with),
        })),
    );

    let items = schema.get_items(&ctx).await.unwrap();

    // The regex filter keeps two of three items, but the second filter's
    // prepare still saw all three, exactly once.
    assert_eq!(items.len(), 2);
    assert_eq!(*prepared_with.lock().unwrap(), vec![3]);
}

/// Test: commands flagged pre-validation run before validators, the rest
/// after, in declared order.
#[tokio::test]
async fn test_command_ordering_around_validation() {
    let ctx = ExecutionContext::new();
    let journal = new_journal();
    let mut schema = sweep_schema(Arc::new(MemoryRepo::new()), &journal)
        .with_validator(LevelValidator::new("check", ValidationLevel::None, &journal))
        .with_command(JournalingCommand::new("fmt", false, &journal))
        .with_command(JournalingCommand::new("prefetch", true, &journal));

    schema.run(&ctx).await.unwrap();

    assert_eq!(
        entries(&journal),
        vec![
            "transform:sweep:a.py+c.py",
            "command:prefetch",
            "validate:check",
            "command:fmt",
        ]
    );
}

/// Test: validation fails fast at the first result above the allowed
/// level, and later validators never run.
#[tokio::test]
async fn test_validation_gates_at_allowed_level() {
    let (ctx, handler) = recording_ctx();
    let journal = new_journal();
    let repo = Arc::new(MemoryRepo::new());
    let mut schema = Schema::new(
        SchemaConfig::new("sweep").with_allowed_validation_level(ValidationLevel::Low),
        Box::new(InlineInput::new(keys(&["a.py"]))),
        Box::new(SingleBatcher::new("sweep")),
        Box::new(JournalingTransformer {
            journal: Arc::clone(&journal),
        }),
        repo.clone(),
    )
    .with_validator(LevelValidator::new("lint", ValidationLevel::Low, &journal))
    .with_validator(LevelValidator::new("tests", ValidationLevel::Error, &journal))
    .with_validator(LevelValidator::new("style", ValidationLevel::Warning, &journal));

    let err = schema.run(&ctx).await.unwrap_err();
    let validation = err.downcast_ref::<ValidationError>().unwrap();
    assert_eq!(validation.validator, "tests");
    assert_eq!(validation.result.level, ValidationLevel::Error);

    // "style" never ran, and the failed batch was rewound without a submit.
    let journal_entries = entries(&journal);
    assert!(journal_entries.contains(&"validate:tests".to_string()));
    assert!(!journal_entries.contains(&"validate:style".to_string()));
    assert_eq!(repo.calls().last().unwrap(), "rewind:sweep");
    assert!(!repo.calls().iter().any(|c| c.starts_with("submit")));

    assert!(handler.events().iter().any(|e| matches!(
        e,
        PipelineEvent::BatchFailed { batch, .. } if batch == "sweep"
    )));
}

/// Test: raising the allowed level lets the same results through.
#[tokio::test]
async fn test_allowed_level_tolerates_matching_results() {
    let ctx = ExecutionContext::new();
    let journal = new_journal();
    let mut schema = Schema::new(
        SchemaConfig::new("sweep").with_allowed_validation_level(ValidationLevel::Error),
        Box::new(InlineInput::new(keys(&["a.py"]))),
        Box::new(SingleBatcher::new("sweep")),
        Box::new(JournalingTransformer {
            journal: Arc::clone(&journal),
        }),
        Arc::new(MemoryRepo::new()),
    )
    .with_validator(LevelValidator::new("tests", ValidationLevel::Error, &journal));

    let report = schema.run(&ctx).await.unwrap();
    assert_eq!(report.submitted, 1);
}

/// Test: a batch with an unresolved change from a prior run is skipped
/// before the transformer does any work.
#[tokio::test]
async fn test_outstanding_change_skips_batch() {
    let (ctx, handler) = recording_ctx();
    let journal = new_journal();
    let repo = Arc::new(MemoryRepo::new());
    repo.mark_outstanding("sweep");
    let mut schema = sweep_schema(Arc::clone(&repo), &journal);

    let report = schema.run(&ctx).await.unwrap();

    assert_eq!(report.submitted, 0);
    assert_eq!(report.batches[0].outcome, BatchOutcome::SkippedOutstanding);
    assert!(entries(&journal).is_empty(), "transformer must not run");
    assert_eq!(
        repo.calls(),
        vec!["clean:sweep", "has_outstanding_change:sweep"]
    );
    assert!(handler.events().iter().any(|e| matches!(
        e,
        PipelineEvent::BatchSkipped { reason, .. } if reason == "outstanding change"
    )));
}

/// Test: a transform that leaves the tree untouched reports no changes.
#[tokio::test]
async fn test_no_tree_changes_reports_clean() {
    let ctx = ExecutionContext::new();
    let journal = new_journal();
    let repo = Arc::new(MemoryRepo::new().with_has_changes(false));
    let mut schema = sweep_schema(Arc::clone(&repo), &journal);

    let report = schema.run(&ctx).await.unwrap();

    assert_eq!(report.submitted, 0);
    assert_eq!(
        report.batches[0].outcome,
        BatchOutcome::NoChanges { abandoned: None }
    );
    assert!(!repo.calls().iter().any(|c| c.starts_with("submit")));
    assert_eq!(repo.calls().last().unwrap(), "rewind:sweep");
}

/// Test: a failing transform still rewinds the tree, and the original
/// error surfaces even when the rewind itself fails.
#[tokio::test]
async fn test_failed_batch_rewinds_best_effort() {
    let (ctx, handler) = recording_ctx();
    let repo = Arc::new(MemoryRepo::new().with_rewind_error("tree locked"));
    let mut schema = Schema::new(
        SchemaConfig::new("sweep"),
        Box::new(InlineInput::new(keys(&["a.py"]))),
        Box::new(SingleBatcher::new("sweep")),
        Box::new(FailingTransformer),
        repo.clone(),
    );

    let err = schema.run(&ctx).await.unwrap_err();
    assert!(err.to_string().contains("transformer exploded"));
    assert_eq!(repo.calls().last().unwrap(), "rewind:sweep");
    assert!(handler.events().iter().any(|e| matches!(
        e,
        PipelineEvent::BatchFailed { error, .. } if error.contains("transformer exploded")
    )));
}

/// Test: the submission cap stops the run and reports the skip.
#[tokio::test]
async fn test_max_submissions_caps_the_run() {
    let (ctx, handler) = recording_ctx();
    let journal = new_journal();
    let repo = Arc::new(MemoryRepo::new());
    let mut schema = Schema::new(
        SchemaConfig::new("sweep").with_max_submissions(2),
        Box::new(InlineInput::new(keys(&["a/x.py", "b/y.py", "c/z.py"]))),
        Box::new(DirectoryBatcher::new("")),
        Box::new(JournalingTransformer {
            journal: Arc::clone(&journal),
        }),
        repo,
    );

    let report = schema.run(&ctx).await.unwrap();

    assert_eq!(report.submitted, 2);
    assert_eq!(report.batches.len(), 2);
    assert!(handler.events().iter().any(|e| matches!(
        e,
        PipelineEvent::BatchSkipped { reason, .. } if reason.contains("submission cap of 2")
    )));
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// Test: updating an existing change re-runs its batch against it and
/// skips the outstanding-change guard.
#[tokio::test]
async fn test_update_refreshes_existing_change() {
    let ctx = ExecutionContext::new();
    let journal = new_journal();
    let repo = Arc::new(MemoryRepo::new());
    let mut schema = sweep_schema(Arc::clone(&repo), &journal);

    let report = schema.run(&ctx).await.unwrap();
    let BatchOutcome::Submitted { change, .. } = &report.batches[0].outcome else {
        panic!("first run should submit");
    };
    let first_calls = repo.calls().len();

    let outcome = schema.update(&ctx, change).await.unwrap();
    let BatchOutcome::Submitted { change: refreshed, updated } = outcome else {
        panic!("update should resubmit");
    };
    assert!(updated);
    assert_eq!(refreshed.id, change.id);

    let update_calls: Vec<String> = repo.calls()[first_calls..].to_vec();
    assert_eq!(
        update_calls,
        vec![
            "clean:sweep".to_string(),
            "has_changes:sweep".to_string(),
            format!("submit_update:{}", change.id),
            "rewind:sweep".to_string(),
        ]
    );
}

/// Test: when the batch behind a change no longer exists, the update
/// abandons the change.
#[tokio::test]
async fn test_update_abandons_vanished_batch() {
    let (ctx, handler) = recording_ctx();
    let journal = new_journal();
    let repo = Arc::new(MemoryRepo::new());
    let mut schema = sweep_schema(Arc::clone(&repo), &journal);

    let gone = Change {
        id: "memory/9".to_string(),
        state: ChangeState::Open,
        schema: "sweep".to_string(),
        batch_title: "renamed batch".to_string(),
        created_at: Utc::now(),
    };
    let outcome = schema.update(&ctx, &gone).await.unwrap();

    assert_eq!(
        outcome,
        BatchOutcome::NoChanges {
            abandoned: Some(gone.clone())
        }
    );
    assert!(repo.calls().contains(&"abandon:memory/9".to_string()));
    assert!(handler.events().iter().any(|e| matches!(
        e,
        PipelineEvent::BatchAbandoned { change, .. } if change == "memory/9"
    )));
}

/// Test: an update whose transform produces nothing abandons the now
/// pointless change.
#[tokio::test]
async fn test_update_with_no_changes_abandons() {
    let ctx = ExecutionContext::new();
    let journal = new_journal();
    let repo = Arc::new(MemoryRepo::new().with_has_changes(false));
    let mut schema = sweep_schema(Arc::clone(&repo), &journal);

    let stale = Change {
        id: "memory/3".to_string(),
        state: ChangeState::Open,
        schema: "sweep".to_string(),
        batch_title: "sweep".to_string(),
        created_at: Utc::now(),
    };
    let outcome = schema.update(&ctx, &stale).await.unwrap();

    assert_eq!(
        outcome,
        BatchOutcome::NoChanges {
            abandoned: Some(stale)
        }
    );
    assert!(repo.calls().contains(&"abandon:memory/3".to_string()));
}

// ---------------------------------------------------------------------------
// Scheduler integration
// ---------------------------------------------------------------------------

fn at(hours: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(hours * 3600, 0).unwrap()
}

/// Test: consecutive daily firings rotate the shard filter so the shards
/// cover every item exactly once per rotation, and nothing about the
/// shard persists after a firing.
#[tokio::test]
async fn test_scheduler_rotates_shards_across_firings() {
    let ctx = ExecutionContext::new();
    let journal = new_journal();
    let all_keys = keys(&["alpha.py", "beta.py", "gamma.py", "delta.py", "epsilon.py"]);

    let schema = Schema::new(
        SchemaConfig::new("sweep"),
        Box::new(InlineInput::new(all_keys.clone())),
        Box::new(SingleBatcher::new("sweep")),
        Box::new(JournalingTransformer {
            journal: Arc::clone(&journal),
        }),
        Arc::new(MemoryRepo::new().with_has_changes(false)),
    );
    let mut runner = Runner::new();
    runner.register(schema).unwrap();

    let scheduler = Scheduler::new(SchedulerSpec {
        base_time: at(0),
        excluded_days: Vec::new(),
        schemas: vec![ScheduledEntry {
            schema_ref: "sweep".to_string(),
            schedule: Schedule::daily(0).with_sharding(2),
        }],
    })
    .unwrap();

    let day0 = scheduler.fire(&ctx, &mut runner, at(0)).await.unwrap();
    let day1 = scheduler.fire(&ctx, &mut runner, at(24)).await.unwrap();
    assert_eq!(day0.fired[0].shard, Some(0));
    assert_eq!(day1.fired[0].shard, Some(1));
    assert!(day0.all_succeeded() && day1.all_succeeded());

    let recorded = entries(&journal);
    assert_eq!(recorded.len(), 2);
    let mut union: Vec<&str> = recorded
        .iter()
        .flat_map(|entry| entry.trim_start_matches("transform:sweep:").split('+'))
        .filter(|key| !key.is_empty())
        .collect();
    union.sort_unstable();
    let mut expected: Vec<&str> = all_keys.iter().map(String::as_str).collect();
    expected.sort_unstable();
    // Two consecutive firings of a two-shard rotation cover everything,
    // with no overlap.
    assert_eq!(union, expected);

    // The shard filter was for that firing only: a direct run sees all
    // items again.
    journal.lock().unwrap().clear();
    runner.run(&ctx, "sweep").await.unwrap();
    assert_eq!(
        entries(&journal),
        vec![format!("transform:sweep:{}", all_keys.join("+"))]
    );
}

/// Test: entries that are not due are skipped with a reason and do not
/// run; a failing due entry is recorded without stopping the rest.
#[tokio::test]
async fn test_scheduler_skips_and_isolates_failures() {
    let (ctx, handler) = recording_ctx();
    let journal = new_journal();

    let good = Schema::new(
        SchemaConfig::new("good"),
        Box::new(InlineInput::new(keys(&["a.py"]))),
        Box::new(SingleBatcher::new("good batch")),
        Box::new(JournalingTransformer {
            journal: Arc::clone(&journal),
        }),
        Arc::new(MemoryRepo::new().with_has_changes(false)),
    );
    let bad = Schema::new(
        SchemaConfig::new("bad"),
        Box::new(InlineInput::new(keys(&["a.py"]))),
        Box::new(SingleBatcher::new("bad batch")),
        Box::new(FailingTransformer),
        Arc::new(MemoryRepo::new()),
    );
    let mut runner = Runner::new();
    runner.register(good).unwrap();
    runner.register(bad).unwrap();

    let scheduler = Scheduler::new(SchedulerSpec {
        base_time: at(0),
        excluded_days: Vec::new(),
        schemas: vec![
            ScheduledEntry {
                schema_ref: "bad".to_string(),
                schedule: Schedule::daily(0),
            },
            ScheduledEntry {
                schema_ref: "good".to_string(),
                schedule: Schedule::daily(0),
            },
            ScheduledEntry {
                schema_ref: "good".to_string(),
                schedule: Schedule::daily(5),
            },
        ],
    })
    .unwrap();

    let report = scheduler.fire(&ctx, &mut runner, at(0)).await.unwrap();

    assert_eq!(report.fired.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("hour"));
    assert_eq!(report.failed_count(), 1);
    assert!(!report.fired[0].succeeded());
    assert!(report.fired[1].succeeded());

    // The good schema still ran after the bad one failed.
    assert_eq!(entries(&journal).len(), 1);
    assert!(handler.events().iter().any(|e| matches!(
        e,
        PipelineEvent::ScheduleSkipped { schema, .. } if schema == "good"
    )));
}

// ---------------------------------------------------------------------------
// Manager integration
// ---------------------------------------------------------------------------

fn tracked_change(id: &str, state: ChangeState, age_hours: i64, now: DateTime<Utc>) -> Change {
    Change {
        id: id.to_string(),
        state,
        schema: "sweep".to_string(),
        batch_title: "sweep".to_string(),
        created_at: now - Duration::hours(age_hours),
    }
}

/// Test: steps evaluate in order per change; a stop_steps decision ends
/// that change's evaluation, and every executed action is journaled.
#[tokio::test]
async fn test_manager_applies_policy_steps() {
    let (ctx, handler) = recording_ctx();
    let now = Utc::now();
    let repo = Arc::new(MemoryRepo::new());
    repo.insert_change(tracked_change("memory/0", ChangeState::Approved, 1, now));
    repo.insert_change(tracked_change("memory/1", ChangeState::Open, 72, now));
    repo.insert_change(tracked_change("memory/2", ChangeState::Open, 1, now));

    let manager = Manager::new(repo.clone())
        .with_step(Box::new(RuleStep {
            when_state: ChangeState::Approved,
            action: Action::Merge,
            stop_steps: true,
        }))
        .with_step(Box::new(StaleChangeStep {
            older_than_hours: 48,
            action: Action::Abandon,
            stop_steps: false,
        }));

    let mut runner = Runner::new();
    let report = manager.run(&ctx, &mut runner, now).await.unwrap();

    assert_eq!(report.reviewed, 3);
    assert_eq!(report.actions.len(), 2);
    assert_eq!(report.actions[0].action, Action::Merge);
    assert_eq!(report.actions[0].change, "memory/0");
    assert_eq!(report.actions[1].action, Action::Abandon);
    assert_eq!(report.actions[1].change, "memory/1");

    let calls = repo.calls();
    assert!(calls.contains(&"merge:memory/0".to_string()));
    assert!(calls.contains(&"abandon:memory/1".to_string()));
    assert!(!calls.iter().any(|c| c.contains("memory/2")));

    assert_eq!(
        handler
            .events()
            .iter()
            .filter(|e| matches!(e, PipelineEvent::ChangeActioned { .. }))
            .count(),
        2
    );
}

/// Test: an update action re-runs the owning schema through the runner.
#[tokio::test]
async fn test_manager_update_action_reruns_schema() {
    let ctx = ExecutionContext::new();
    let journal = new_journal();
    let repo = Arc::new(MemoryRepo::new());
    let mut runner = Runner::new();
    runner
        .register(sweep_schema(Arc::clone(&repo), &journal))
        .unwrap();

    // First run opens a change; the stale step then forces a refresh.
    runner.run(&ctx, "sweep").await.unwrap();
    let change_id = repo.changes()[0].id.clone();

    let manager = Manager::new(repo.clone()).with_step(Box::new(StaleChangeStep {
        older_than_hours: 0,
        action: Action::Update,
        stop_steps: true,
    }));
    let report = manager.run(&ctx, &mut runner, Utc::now()).await.unwrap();

    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].action, Action::Update);
    assert!(repo
        .calls()
        .contains(&format!("submit_update:{change_id}")));
}

/// Test: add_reviewers actions reach the repo with the reviewer list.
#[tokio::test]
async fn test_manager_add_reviewers_action() {
    let ctx = ExecutionContext::new();
    let now = Utc::now();
    let repo = Arc::new(MemoryRepo::new());
    repo.insert_change(tracked_change("memory/0", ChangeState::Open, 1, now));

    let manager = Manager::new(repo.clone()).with_step(Box::new(RuleStep {
        when_state: ChangeState::Open,
        action: Action::AddReviewers {
            reviewers: vec!["maia".to_string(), "jules".to_string()],
        },
        stop_steps: false,
    }));

    let mut runner = Runner::new();
    manager.run(&ctx, &mut runner, now).await.unwrap();
    assert!(repo
        .calls()
        .contains(&"add_reviewers:memory/0:maia,jules".to_string()));
}
