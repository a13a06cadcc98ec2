//! Time-bucket scheduling and shard rotation.
//!
//! All schedule arithmetic is relative to the scheduler's `base_time`, not
//! the calendar: hour zero is the base hour and day zero is the base day.
//! That keeps firing decisions independent of time zones and lets shard
//! rotation walk every shard across consecutive periods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ConfigError;
use crate::context::ExecutionContext;
use crate::events::PipelineEvent;
use crate::filter::{InvertibleFilter, ShardFilter};
use crate::runner::Runner;
use crate::schema::SchemaRunReport;

// ---------------------------------------------------------------------------
// Time buckets
// ---------------------------------------------------------------------------

/// Errors in schedule arithmetic.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("current time {now} precedes scheduler base time {base}")]
    NowBeforeBase {
        base: DateTime<Utc>,
        now: DateTime<Utc>,
    },
}

/// Elapsed-time buckets derived from `(now - base_time)`.
///
/// `hour_of_day` and `day_of_week` count from the base instant: the hour
/// containing `base_time` is hour zero of day zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeBuckets {
    pub elapsed_hours: i64,
    pub hour_of_day: u32,
    pub elapsed_days: i64,
    pub day_of_week: u32,
    pub elapsed_weeks: i64,
}

impl TimeBuckets {
    pub fn between(base: DateTime<Utc>, now: DateTime<Utc>) -> Result<Self, ScheduleError> {
        let elapsed_seconds = (now - base).num_seconds();
        if elapsed_seconds < 0 {
            return Err(ScheduleError::NowBeforeBase { base, now });
        }
        let elapsed_hours = elapsed_seconds / 3600;
        let elapsed_days = elapsed_hours / 24;
        Ok(Self {
            elapsed_hours,
            hour_of_day: (elapsed_hours % 24) as u32,
            elapsed_days,
            day_of_week: (elapsed_days % 7) as u32,
            elapsed_weeks: elapsed_days / 7,
        })
    }
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

/// Cadence of a scheduled schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repeats {
    Daily,
    Weekly,
}

/// Shard rotation for a scheduled schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSpec {
    pub num_shards: u32,
}

/// The shard a particular firing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShardAssignment {
    pub num_shards: u32,
    pub valid_shard: u32,
}

/// When a schema fires, relative to the scheduler's base time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub repeats: Repeats,
    /// Hour within the base-relative day, 0 through 23.
    pub hour_of_day: u32,
    /// Day within the base-relative week, 0 through 6. Required for weekly
    /// schedules, rejected for daily ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharding: Option<ShardSpec>,
}

impl Schedule {
    pub fn daily(hour_of_day: u32) -> Self {
        Self {
            repeats: Repeats::Daily,
            hour_of_day,
            day_of_week: None,
            sharding: None,
        }
    }

    pub fn weekly(day_of_week: u32, hour_of_day: u32) -> Self {
        Self {
            repeats: Repeats::Weekly,
            hour_of_day,
            day_of_week: Some(day_of_week),
            sharding: None,
        }
    }

    pub fn with_sharding(mut self, num_shards: u32) -> Self {
        self.sharding = Some(ShardSpec { num_shards });
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hour_of_day > 23 {
            return Err(invalid_schedule(format!(
                "hour_of_day {} out of range",
                self.hour_of_day
            )));
        }
        match (self.repeats, self.day_of_week) {
            (Repeats::Weekly, None) => {
                return Err(invalid_schedule("weekly schedule requires day_of_week"));
            }
            (Repeats::Daily, Some(_)) => {
                return Err(invalid_schedule("daily schedule must not set day_of_week"));
            }
            (_, Some(day)) if day > 6 => {
                return Err(invalid_schedule(format!("day_of_week {day} out of range")));
            }
            _ => {}
        }
        if let Some(sharding) = self.sharding {
            if sharding.num_shards == 0 {
                return Err(invalid_schedule("num_shards must be positive"));
            }
        }
        Ok(())
    }

    /// Whether this schedule fires in the given buckets.
    ///
    /// The excluded-days set applies to daily and weekly schedules alike.
    pub fn due(&self, buckets: &TimeBuckets, excluded_days: &[u32]) -> DueDecision {
        if buckets.hour_of_day != self.hour_of_day {
            return DueDecision::WrongHour {
                scheduled: self.hour_of_day,
                current: buckets.hour_of_day,
            };
        }
        if let Repeats::Weekly = self.repeats {
            // validate() guarantees day_of_week for weekly schedules.
            let scheduled = self.day_of_week.unwrap_or(0);
            if buckets.day_of_week != scheduled {
                return DueDecision::WrongDay {
                    scheduled,
                    current: buckets.day_of_week,
                };
            }
        }
        if excluded_days.contains(&buckets.day_of_week) {
            return DueDecision::ExcludedDay {
                day: buckets.day_of_week,
            };
        }
        DueDecision::Fire
    }

    /// Shard covered by a firing in the given buckets: the elapsed period
    /// count modulo `num_shards`, so consecutive firings rotate through
    /// every shard.
    pub fn shard_assignment(&self, buckets: &TimeBuckets) -> Option<ShardAssignment> {
        let sharding = self.sharding?;
        let elapsed = match self.repeats {
            Repeats::Daily => buckets.elapsed_days,
            Repeats::Weekly => buckets.elapsed_weeks,
        };
        Some(ShardAssignment {
            num_shards: sharding.num_shards,
            valid_shard: (elapsed % i64::from(sharding.num_shards)) as u32,
        })
    }
}

fn invalid_schedule(message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParams {
        component: "schedule".to_string(),
        message: message.into(),
    }
}

/// Why a schedule did or did not fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DueDecision {
    Fire,
    WrongHour { scheduled: u32, current: u32 },
    WrongDay { scheduled: u32, current: u32 },
    ExcludedDay { day: u32 },
}

impl DueDecision {
    pub fn is_due(&self) -> bool {
        matches!(self, DueDecision::Fire)
    }

    /// Human-readable skip reason for events and reports.
    pub fn reason(&self) -> String {
        match self {
            DueDecision::Fire => "due".to_string(),
            DueDecision::WrongHour { scheduled, current } => {
                format!("scheduled for hour {scheduled}, current hour is {current}")
            }
            DueDecision::WrongDay { scheduled, current } => {
                format!("scheduled for day {scheduled}, current day is {current}")
            }
            DueDecision::ExcludedDay { day } => format!("day {day} is excluded"),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Persisted scheduler document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSpec {
    pub base_time: DateTime<Utc>,
    /// Base-relative days of the week on which nothing fires.
    #[serde(default)]
    pub excluded_days: Vec<u32>,
    #[serde(default)]
    pub schemas: Vec<ScheduledEntry>,
}

/// One scheduled schema, referenced by registered name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEntry {
    pub schema_ref: String,
    pub schedule: Schedule,
}

/// Fires due schemas against a runner, one at a time.
#[derive(Debug)]
pub struct Scheduler {
    base_time: DateTime<Utc>,
    excluded_days: Vec<u32>,
    entries: Vec<ScheduledEntry>,
}

impl Scheduler {
    pub fn new(spec: SchedulerSpec) -> Result<Self, ConfigError> {
        for day in &spec.excluded_days {
            if *day > 6 {
                return Err(invalid_schedule(format!("excluded day {day} out of range")));
            }
        }
        for entry in &spec.schemas {
            entry.schedule.validate()?;
        }
        Ok(Self {
            base_time: spec.base_time,
            excluded_days: spec.excluded_days,
            entries: spec.schemas,
        })
    }

    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        let spec: SchedulerSpec = serde_json::from_str(doc).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })?;
        Self::new(spec)
    }

    pub fn base_time(&self) -> DateTime<Utc> {
        self.base_time
    }

    /// Run every entry due at `now`.
    ///
    /// Entries run sequentially in declared order. A failing schema run is
    /// recorded in the report and does not stop later entries. Sharded
    /// entries get a fresh shard filter for this firing only; nothing about
    /// the shard survives the run.
    pub async fn fire(
        &self,
        ctx: &ExecutionContext,
        runner: &mut Runner,
        now: DateTime<Utc>,
    ) -> anyhow::Result<FireReport> {
        let buckets = TimeBuckets::between(self.base_time, now)?;
        let mut report = FireReport::default();

        for entry in &self.entries {
            let decision = entry.schedule.due(&buckets, &self.excluded_days);
            if !decision.is_due() {
                let reason = decision.reason();
                ctx.emit(PipelineEvent::ScheduleSkipped {
                    schema: entry.schema_ref.clone(),
                    reason: reason.clone(),
                });
                report.skipped.push(SkippedEntry {
                    schema: entry.schema_ref.clone(),
                    reason,
                });
                continue;
            }

            let assignment = entry.schedule.shard_assignment(&buckets);
            ctx.emit(PipelineEvent::ScheduleFired {
                schema: entry.schema_ref.clone(),
                shard: assignment.map(|a| a.valid_shard),
            });

            let outcome = match assignment {
                Some(assignment) => {
                    let shard = ShardFilter::new(assignment.num_shards)?
                        .with_valid_shard(assignment.valid_shard)?;
                    runner
                        .run_with_filter(
                            ctx,
                            &entry.schema_ref,
                            InvertibleFilter::new(Box::new(shard)),
                        )
                        .await
                }
                None => runner.run(ctx, &entry.schema_ref).await,
            };

            match outcome {
                Ok(run) => report.fired.push(FiredEntry {
                    schema: entry.schema_ref.clone(),
                    shard: assignment.map(|a| a.valid_shard),
                    run: Some(run),
                    error: None,
                }),
                Err(err) => {
                    warn!(schema = %entry.schema_ref, error = %format!("{err:#}"), "scheduled run failed");
                    report.fired.push(FiredEntry {
                        schema: entry.schema_ref.clone(),
                        shard: assignment.map(|a| a.valid_shard),
                        run: None,
                        error: Some(format!("{err:#}")),
                    });
                }
            }
        }
        Ok(report)
    }
}

/// One fired entry's outcome.
#[derive(Debug, Clone, Serialize)]
pub struct FiredEntry {
    pub schema: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<SchemaRunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FiredEntry {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    pub schema: String,
    pub reason: String,
}

/// Everything one `fire` call did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FireReport {
    pub fired: Vec<FiredEntry>,
    pub skipped: Vec<SkippedEntry>,
}

impl FireReport {
    pub fn failed_count(&self) -> usize {
        self.fired.iter().filter(|f| !f.succeeded()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count() == 0
    }
}
