use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Invalid state for job {job_id}: {reason}")]
    InvalidState { job_id: Uuid, reason: String },

    #[error("Concurrent modification of job {job_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        job_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("Job {job_id} could not be launched: {reason}")]
    FatalLaunchFailure { job_id: Uuid, reason: String },

    #[error("Timeout! Even after {checks} checks ({elapsed:?}) there was no stream update for job {job_id}")]
    Timeout {
        job_id: Uuid,
        checks: u32,
        elapsed: Duration,
    },

    #[error("{target} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        target: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Instance is shutting down")]
    ShuttingDown,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    pub fn invalid_state(job_id: Uuid, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            job_id,
            reason: reason.into(),
        }
    }

    /// Whether the error is an optimistic-lock conflict that a retry may resolve.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
