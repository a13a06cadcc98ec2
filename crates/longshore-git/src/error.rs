//! Error types for git invocations.

/// Errors from running git or interpreting its output.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run git: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("could not parse git output for {context}: {detail}")]
    Parse { context: String, detail: String },
}
