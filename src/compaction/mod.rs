//! Compaction request lifecycle, per-region tracking, and bounded execution.
//!
//! A maintenance policy (external) selects files and builds a
//! [`CompactionRequest`]; [`CompactionExecutor::submit`] registers it with
//! the shared [`CompactionTracker`] and queues it; a worker runs it to a
//! terminal state, on which the request's resources are released
//! unconditionally — success, failure, and rejection all pay the same
//! cleanup.

mod executor;
mod request;
mod tracker;

use thiserror::Error;

pub use executor::CompactionExecutor;
pub use request::{CompactionOutcome, CompactionRequest, RequestState, USER_PRIORITY};
pub use tracker::{CompactionState, CompactionTracker};

/// Errors surfaced by request construction, admission, and execution.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// A request was constructed without any selected files; nothing was
    /// scheduled.
    #[error("compaction request has an empty file selection")]
    EmptySelection,
    /// The executor's queue is full; the request was rejected and its
    /// resources released. The caller may re-submit later.
    #[error("compaction queue is full ({capacity} pending)")]
    Saturated {
        /// Configured queue capacity at the time of rejection.
        capacity: usize,
    },
    /// The executor is shutting down and admits no further work.
    #[error("compaction executor is shut down")]
    Shutdown,
    /// The merge failed in the underlying storage; contained within the one
    /// request, which terminates as failed without retry.
    #[error("compaction io error: {0}")]
    Io(#[from] std::io::Error),
}
