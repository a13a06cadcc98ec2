//! Tracing bootstrap for Longshore binaries.
//!
//! Call [`init_tracing`] once at program start. `RUST_LOG` always wins when
//! set; otherwise the filter enables the requested level for the longshore
//! crates only and caps everything else at `warn`, so `--verbose` raises
//! pipeline detail without raising dependency noise.
//!
//! Safe to call more than once; the global subscriber can only be set once
//! per process and later calls are ignored.

use tracing::Level;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose log output follows the requested verbosity.
const WORKSPACE_TARGETS: [&str; 3] = ["longshore_core", "longshore_git", "longshore_cli"];

/// Fallback for an unset `RUST_LOG`: `level` for this workspace's crates,
/// `warn` for the rest of the dependency tree.
fn fallback_directives(level: Level) -> String {
    let scoped: Vec<String> = WORKSPACE_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect();
    format!("warn,{}", scoped.join(","))
}

/// Initialise the global tracing subscriber.
///
/// * `json` - emit newline-delimited JSON log lines instead of the
///   human-readable format (useful for log aggregation pipelines).
/// * `level` - verbosity for the longshore crates when `RUST_LOG` is unset.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback_directives(level)));

    let format_layer = if json {
        fmt::layer().with_target(false).json().boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(format_layer)
        .try_init()
        .ok();
}
