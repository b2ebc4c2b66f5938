//! Error types for the balancer.

use thiserror::Error;

use crate::worker::WorkerId;

/// Balancer errors.
///
/// Errors are surfaced as values; nothing in the core panics across a
/// component boundary. Per-task failures (rejection by a worker that turned
/// busy between selection and admission) travel on the task result channel
/// instead, as a [`crate::task::TaskStatus::Rejected`] record.
#[derive(Error, Debug)]
pub enum BalancerError {
    /// Worker id does not exist in the pool.
    #[error("worker not found: {0}")]
    WorkerNotFound(WorkerId),

    /// Algorithm name not in {RR, RAN, WRR, WRAN}.
    #[error("unknown load-balancing algorithm: {0}")]
    UnknownAlgorithm(String),

    /// No worker can admit the task right now: every worker is unavailable,
    /// memory-full, or mid-collection even after the escape pass.
    #[error("no worker can accept the task: {0}")]
    NoEligibleWorker(&'static str),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for balancer operations.
pub type Result<T> = std::result::Result<T, BalancerError>;
