//! Longshore - Batch Code-Change Automation CLI
//!
//! The `longshore` command runs schema pipelines against a working tree.
//!
//! ## Commands
//!
//! - `run`: Execute schemas immediately, in the order given
//! - `schedule`: Fire a scheduler document once against registered schemas
//! - `manage`: Review outstanding changes against manager policy steps
//! - `update`: Re-run the owning schema for one outstanding change
//!
//! Config documents are JSON and may be given as a file path, as `env:VAR`
//! to read an environment variable, or inline when the argument starts
//! with `{`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use longshore_core::{
    BatchOutcome, ComponentRegistry, ExecutionContext, ManagerSpec, Runner, SchemaSpec, Scheduler,
};

#[derive(Parser)]
#[command(name = "longshore")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Batch code-change automation pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run schemas immediately, in the order given
    Run {
        /// Schema documents (path, env:VAR, or inline JSON)
        #[arg(required = true)]
        schemas: Vec<String>,
    },

    /// Fire a scheduler document once
    Schedule {
        /// Scheduler document (path, env:VAR, or inline JSON)
        #[arg(long)]
        scheduler: String,

        /// Schema documents the scheduler may reference (repeatable)
        #[arg(long = "schema", required = true)]
        schemas: Vec<String>,

        /// Decide due-ness as of this instant instead of the wall clock
        #[arg(long, value_parser = parse_instant)]
        now: Option<DateTime<Utc>>,
    },

    /// Review outstanding changes against manager policy steps
    Manage {
        /// Manager document (path, env:VAR, or inline JSON)
        #[arg(long)]
        manager: String,

        /// Schema documents update actions may re-run (repeatable)
        #[arg(long = "schema", required = true)]
        schemas: Vec<String>,

        /// Evaluate staleness as of this instant instead of the wall clock
        #[arg(long, value_parser = parse_instant)]
        now: Option<DateTime<Utc>>,
    },

    /// Re-run the owning schema for one outstanding change
    Update {
        /// Change id to refresh
        change: String,

        /// Schema documents to search for the owning schema (repeatable)
        #[arg(long = "schema", required = true)]
        schemas: Vec<String>,
    },
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    raw.parse::<DateTime<Utc>>()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    longshore_core::init_tracing(cli.json, level);

    let ctx = ExecutionContext::new();

    match cli.command {
        Commands::Run { schemas } => cmd_run(&ctx, &schemas).await,
        Commands::Schedule {
            scheduler,
            schemas,
            now,
        } => cmd_schedule(&ctx, &scheduler, &schemas, now).await,
        Commands::Manage {
            manager,
            schemas,
            now,
        } => cmd_manage(&ctx, &manager, &schemas, now).await,
        Commands::Update { change, schemas } => cmd_update(&ctx, &change, &schemas).await,
    }
}

/// Registry with built-ins plus the git-backed components.
fn component_registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::builtin();
    longshore_git::register(&mut registry);
    registry
}

/// Resolves a document argument: `env:VAR`, inline JSON, or a file path.
fn load_document(reference: &str) -> Result<String> {
    if let Some(var) = reference.strip_prefix("env:") {
        return std::env::var(var).with_context(|| format!("environment variable {var} not set"));
    }
    if reference.trim_start().starts_with('{') {
        return Ok(reference.to_string());
    }
    std::fs::read_to_string(reference)
        .with_context(|| format!("failed to read config document {reference}"))
}

/// Builds a runner from schema documents, keeping their declared order.
fn build_runner(schema_refs: &[String]) -> Result<(Runner, Vec<String>)> {
    let registry = component_registry();
    let mut runner = Runner::new();
    let mut names = Vec::new();
    for reference in schema_refs {
        let doc = load_document(reference)?;
        let spec = SchemaSpec::from_json(&doc)?;
        names.push(spec.name.clone());
        runner.register(spec.build(&registry)?)?;
    }
    Ok((runner, names))
}

async fn cmd_run(ctx: &ExecutionContext, schema_refs: &[String]) -> Result<()> {
    let (mut runner, names) = build_runner(schema_refs)?;
    let mut reports = Vec::new();
    for name in &names {
        info!(schema = %name, "running schema");
        reports.push(runner.run(ctx, name).await?);
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

async fn cmd_schedule(
    ctx: &ExecutionContext,
    scheduler_ref: &str,
    schema_refs: &[String],
    now: Option<DateTime<Utc>>,
) -> Result<()> {
    let (mut runner, _) = build_runner(schema_refs)?;
    let scheduler = Scheduler::from_json(&load_document(scheduler_ref)?)?;
    let now = now.unwrap_or_else(Utc::now);

    let report = scheduler.fire(ctx, &mut runner, now).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.all_succeeded() {
        anyhow::bail!("{} scheduled run(s) failed", report.failed_count());
    }
    Ok(())
}

async fn cmd_manage(
    ctx: &ExecutionContext,
    manager_ref: &str,
    schema_refs: &[String],
    now: Option<DateTime<Utc>>,
) -> Result<()> {
    let (mut runner, _) = build_runner(schema_refs)?;
    let spec = ManagerSpec::from_json(&load_document(manager_ref)?)?;
    let manager = spec.build(&component_registry())?;
    let now = now.unwrap_or_else(Utc::now);

    let report = manager.run(ctx, &mut runner, now).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_update(ctx: &ExecutionContext, change_id: &str, schema_refs: &[String]) -> Result<()> {
    let (mut runner, names) = build_runner(schema_refs)?;

    let mut target = None;
    for name in &names {
        let Some(schema) = runner.get(name) else {
            continue;
        };
        let repo = schema.repo();
        let scoped = ctx.for_schema(name.clone());
        for change in repo.outstanding_changes(&scoped).await? {
            if change.id == change_id {
                target = Some(change);
                break;
            }
        }
        if target.is_some() {
            break;
        }
    }

    let change = target.with_context(|| format!("no outstanding change with id {change_id}"))?;
    info!(change = %change.id, schema = %change.schema, "updating change");
    let outcome = runner.update(ctx, &change).await?;

    #[derive(Serialize)]
    struct UpdateOutput {
        change: String,
        schema: String,
        #[serde(flatten)]
        outcome: BatchOutcome,
    }
    let output = UpdateOutput {
        change: change.id.clone(),
        schema: change.schema.clone(),
        outcome,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
