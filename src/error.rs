//! Error taxonomy for the orchestrator (§7 of the design).
//!
//! Each variant here is surfaced through `anyhow::Error` at process boundaries (`main`, and the
//! public [`crate::runner::Runner`] methods), but kept as a `thiserror` enum internally so callers
//! that need to distinguish, say, a config mistake from a worker crash can match on it.

use std::path::PathBuf;

/// Errors the orchestrator can raise.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Conflicting flags, an existing output file, a malformed CPU list, or any other argument
    /// combination that's fatal before any process is spawned.
    #[error("{0}")]
    Config(String),

    /// The executable path supplied for `--python`/`--compare-to` could not be resolved.
    #[error("could not resolve executable path {path:?}: {source}")]
    InvalidExecutable {
        /// The path that failed to resolve.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A worker process could not be spawned at all (exec failure).
    #[error("failed to spawn worker command {command:?}: {source}")]
    WorkerSpawn {
        /// The argument vector that failed to spawn.
        command: Vec<String>,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A worker's pipe payload was empty, malformed, or did not contain exactly one benchmark.
    #[error("worker protocol violation: {0}")]
    WorkerProtocol(String),

    /// A worker exited with a nonzero status.
    #[error("worker failed with exit code {code}")]
    WorkerFailed {
        /// The worker's exit code, if the process was not killed by a signal.
        code: i32,
    },

    /// CPU affinity pinning was requested explicitly and the platform/permissions refused it.
    #[error("CPU affinity not available: {0}")]
    PinningUnavailable(String),

    /// The run was interrupted (SIGINT/Ctrl-C).
    #[error("interrupted")]
    Interrupted,

    /// Wraps any other I/O failure (pipe creation, file writes for `--output`/`--append`).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wraps a JSON (de)serialization failure for the pipe wire format or `--output`/`--append`.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
