//! Error taxonomy (spec.md §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Raised by `check_acyclic`, fatal. Never reached once execution
    /// has started.
    #[error("cycle detected in build plan:\n{0}")]
    CycleDetected(String),

    /// Raised when `can_fork()` is false at the moment a fork was
    /// attempted. Not fatal on its own: the scheduler degrades to the
    /// serial fallback (at `execute()` start) or to an inline
    /// foreground run (mid-build, per action).
    #[error("fork is unsafe: more than one thread is live in the coordinator process")]
    ForkUnsafe,

    /// A worker exited with a nonzero status, or its result file was
    /// missing or unreadable.
    #[error("worker process crashed: {reason}")]
    WorkerCrashed { reason: String },

    /// The worker (or the synchronous retry) exited cleanly but
    /// reported failure through its result, or `perform` itself
    /// returned an error.
    #[error("{description}: {cause}")]
    ActionFailed {
        description: String,
        #[source]
        cause: anyhow::Error,
    },

    /// The dependency oracle raised while the plan was being built.
    #[error("dependency oracle error: {0}")]
    OracleError(#[source] anyhow::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
