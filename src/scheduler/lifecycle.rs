//! Guarded state transitions shared by both job flavors.
//!
//! Every function mutates the job in place and leaves it untouched when the
//! guard rejects the transition. None of them persists anything: callers pair
//! a transition with a versioned write, which is what actually protects
//! against concurrent modification.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{CoordinatorError, Result};
use crate::scheduler::job::{ExecutionResult, Job, JobState};

/// INITIALIZING/CREATED -> READY_TO_START
pub fn approve<S: JobState>(job: &mut Job<S>) -> Result<()> {
    if job.execution_state != S::initial() {
        return Err(CoordinatorError::invalid_state(
            job.id,
            format!(
                "cannot approve job in state {}, expected {}",
                job.execution_state,
                S::initial()
            ),
        ));
    }
    job.execution_state = S::ready_to_start();
    Ok(())
}

/// READY_TO_START -> STARTED/RUNNING
pub fn claim<S: JobState>(job: &mut Job<S>) -> Result<()> {
    if job.execution_state != S::ready_to_start() {
        return Err(CoordinatorError::invalid_state(
            job.id,
            format!("cannot claim job in state {}", job.execution_state),
        ));
    }
    job.execution_state = S::running();
    job.started_at = Some(Utc::now());
    job.current_execution = None;
    Ok(())
}

/// Any non-terminal state -> terminal failure state.
pub fn mark_failed<S: JobState>(job: &mut Job<S>) -> Result<()> {
    if job.execution_state.is_terminal() {
        return Err(CoordinatorError::invalid_state(
            job.id,
            format!("cannot mark job as failed, already in {}", job.execution_state),
        ));
    }
    job.execution_state = S::ended(ExecutionResult::Failed);
    job.execution_result = ExecutionResult::Failed;
    job.ended_at = Some(Utc::now());
    Ok(())
}

/// STARTED/RUNNING -> terminal state matching `result`.
pub fn mark_done<S: JobState>(job: &mut Job<S>, result: ExecutionResult) -> Result<()> {
    if !result.has_finished() {
        return Err(CoordinatorError::invalid_state(
            job.id,
            "a finished job needs result OK or FAILED",
        ));
    }
    if !job.execution_state.is_running() {
        return Err(CoordinatorError::invalid_state(
            job.id,
            format!("cannot finish job in state {}", job.execution_state),
        ));
    }
    job.execution_state = S::ended(result);
    job.execution_result = result;
    job.ended_at = Some(Utc::now());
    Ok(())
}

/// Guard of [`cancel`] without the transition.
pub fn ensure_cancelable<S: JobState>(job: &Job<S>) -> Result<()> {
    if job.execution_state.is_terminal() {
        return Err(CoordinatorError::invalid_state(
            job.id,
            format!("job already ended ({})", job.execution_state),
        ));
    }
    if job.execution_result.has_finished() {
        return Err(CoordinatorError::invalid_state(
            job.id,
            format!("job already has a result ({})", job.execution_result),
        ));
    }
    Ok(())
}

/// Non-terminal -> CANCEL_REQUESTED.
///
/// Cancellation is recorded as a failed execution; only the state tells the
/// two apart.
pub fn cancel<S: JobState>(job: &mut Job<S>) -> Result<()> {
    ensure_cancelable(job)?;
    job.execution_state = S::cancel_requested();
    job.execution_result = ExecutionResult::Failed;
    job.ended_at = Some(Utc::now());
    Ok(())
}

/// Any state -> STARTED/RUNNING with a fresh start time. Administrative override.
pub fn restart<S: JobState>(job: &mut Job<S>) {
    job.execution_state = S::running();
    job.execution_result = ExecutionResult::None;
    job.started_at = Some(Utc::now());
    job.ended_at = None;
    job.current_execution = None;
}

/// Hand a running job to one execution. Writes of any earlier execution
/// are rejected from then on.
pub fn bind_execution<S: JobState>(job: &mut Job<S>, execution_id: Uuid) -> Result<()> {
    if !job.execution_state.is_running() {
        return Err(CoordinatorError::invalid_state(
            job.id,
            format!("cannot start an execution for job in state {}", job.execution_state),
        ));
    }
    job.current_execution = Some(execution_id);
    Ok(())
}

/// CANCEL_REQUESTED -> final canceled state.
pub fn confirm_canceled<S: JobState>(job: &mut Job<S>) -> Result<()> {
    if job.execution_state != S::cancel_requested() {
        return Err(CoordinatorError::invalid_state(
            job.id,
            format!("no cancel requested, job is in {}", job.execution_state),
        ));
    }
    job.execution_state = S::canceled();
    if job.ended_at.is_none() {
        job.ended_at = Some(Utc::now());
    }
    Ok(())
}

/// Store the execution side's current stream buffers.
pub fn record_streams<S: JobState>(job: &mut Job<S>, output: String, error: String) {
    job.output_stream = output;
    job.error_stream = error;
    job.last_stream_update_at = Some(Utc::now());
}
