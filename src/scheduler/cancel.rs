use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::CancelConfig;
use crate::error::{CoordinatorError, Result};
use crate::notify::{JobEvent, JobEventKind, NotificationSink};
use crate::scheduler::job::{Job, JobState};
use crate::scheduler::lifecycle;
use crate::store::{IsolatedWork, JobStore};
use crate::stream::ResilientRetryExecutor;
use crate::worker::launcher::ExecutionLauncher;

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome<S> {
    /// Nothing to cancel; treated as already resolved
    NotFound,
    Canceled(Job<S>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestartOutcome<S> {
    NotFound,
    /// Refused by [`CancellationAndRestartCoordinator::restart_soft`]
    AlreadyFinished,
    Restarted(Job<S>),
}

/// What one pass over pending cancel requests did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Running here and told to stop; the execution finalizes the job
    pub stopped: Vec<Uuid>,
    /// Finalized without a live execution
    pub finalized: Vec<Uuid>,
    /// Too young to be considered orphaned
    pub waiting: Vec<Uuid>,
    /// Finalized concurrently by someone else
    pub already_done: Vec<Uuid>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.stopped.is_empty()
            && self.finalized.is_empty()
            && self.waiting.is_empty()
            && self.already_done.is_empty()
    }
}

/// Administrative cancel and restart of single jobs, plus the periodic
/// finalization of cancel requests nobody acted on.
pub struct CancellationAndRestartCoordinator<S: JobState> {
    config: CancelConfig,
    store: Arc<dyn JobStore<S>>,
    launcher: Arc<dyn ExecutionLauncher<S>>,
    notifications: Arc<dyn NotificationSink>,
    writer: ResilientRetryExecutor,
    shutdown: CancellationToken,
}

impl<S: JobState> CancellationAndRestartCoordinator<S> {
    pub fn new(
        config: CancelConfig,
        store: Arc<dyn JobStore<S>>,
        launcher: Arc<dyn ExecutionLauncher<S>>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        let writer = ResilientRetryExecutor::new(config.write_retries);
        Self {
            config,
            store,
            launcher,
            notifications,
            writer,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<CancelOutcome<S>> {
        let Some(job) = self.store.find_by_id(job_id).await? else {
            tracing::warn!(job_id = %job_id, "Cannot cancel job, not found");
            return Ok(CancelOutcome::NotFound);
        };
        lifecycle::ensure_cancelable(&job)?;

        match self.launcher.find_execution(job_id).await {
            Some(handle) => {
                if let Err(e) = self.launcher.stop(&handle).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Stopping execution failed, canceling anyway");
                }
            }
            None => tracing::debug!(job_id = %job_id, "No execution running on this instance"),
        }

        let canceled = self
            .write(job_id, "cancel", || Box::new(lifecycle::cancel::<S>))
            .await?;

        tracing::info!(job_id = %job_id, state = %canceled.execution_state, "Job canceled");
        self.notifications.publish(JobEvent::new(
            JobEventKind::JobCanceled,
            job_id,
            serde_json::json!({ "owner": canceled.owner, "ended_at": canceled.ended_at }),
        ));
        Ok(CancelOutcome::Canceled(canceled))
    }

    /// Restart unless the job already has a result.
    pub async fn restart_soft(&self, job_id: Uuid) -> Result<RestartOutcome<S>> {
        if let Some(job) = self.store.find_by_id(job_id).await? {
            if job.execution_result.has_finished() {
                tracing::warn!(job_id = %job_id, result = %job.execution_result, "Cannot restart job, already finished");
                self.notifications.publish(JobEvent::new(
                    JobEventKind::JobRestartCanceled,
                    job_id,
                    serde_json::json!({ "owner": job.owner, "reason": "job already finished" }),
                ));
                return Ok(RestartOutcome::AlreadyFinished);
            }
        }
        self.restart(job_id).await
    }

    /// Restart from any state, superseding whatever execution the job had.
    pub async fn restart(&self, job_id: Uuid) -> Result<RestartOutcome<S>> {
        let Some(job) = self.store.find_by_id(job_id).await? else {
            tracing::warn!(job_id = %job_id, "Cannot restart job, not found");
            self.notifications.publish(JobEvent::new(
                JobEventKind::JobRestartCanceled,
                job_id,
                serde_json::json!({ "reason": "job not found" }),
            ));
            return Ok(RestartOutcome::NotFound);
        };
        tracing::info!(job_id = %job_id, state = %job.execution_state, "Restarting job");

        if let Some(handle) = self.launcher.find_execution(job_id).await {
            match self.launcher.stop(&handle).await {
                Ok(()) => tracing::info!(job_id = %job_id, "Previous execution stopped"),
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Stopping previous execution failed"),
            }
            match self.launcher.abandon(&handle).await {
                Ok(()) => tracing::info!(job_id = %job_id, "Previous execution abandoned"),
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Abandoning previous execution failed"),
            }
        }

        let restarted = self
            .write(job_id, "restart", || {
                Box::new(|job| {
                    lifecycle::restart(job);
                    Ok(())
                })
            })
            .await?;

        if let Err(e) = self.launcher.launch(&restarted).await {
            tracing::error!(job_id = %job_id, error = %e, "Relaunch after restart failed, marking job as failed");
            if let Err(mark_err) = self.write(job_id, "failure mark", || Box::new(lifecycle::mark_failed::<S>)).await {
                tracing::error!(job_id = %job_id, error = %mark_err, "Could not mark job as failed");
            }
            self.notifications.publish(JobEvent::new(
                JobEventKind::JobFailed,
                job_id,
                serde_json::json!({ "reason": e.to_string() }),
            ));
            return Err(match e {
                CoordinatorError::FatalLaunchFailure { .. } => e,
                other => CoordinatorError::FatalLaunchFailure {
                    job_id,
                    reason: other.to_string(),
                },
            });
        }

        self.notifications.publish(JobEvent::new(
            JobEventKind::JobRestarted,
            job_id,
            serde_json::json!({ "owner": restarted.owner, "started_at": restarted.started_at }),
        ));
        Ok(RestartOutcome::Restarted(restarted))
    }

    /// Finalize cancel requests whose execution is gone.
    ///
    /// A request whose execution runs here is handed to that execution. A
    /// request nobody serves is only finalized once it is older than the
    /// orphan threshold, since a peer instance may still be working on it.
    pub async fn handle_cancel_requests(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        if S::canceled() == S::cancel_requested() {
            // cancel request is already final for this flavor
            return Ok(report);
        }
        let pending = self.store.find_in_state(S::cancel_requested()).await?;

        let orphaned_before = Utc::now() - self.config.orphan_after();

        for job in pending {
            let job_id = job.id;
            let orphaned = match self.launcher.find_execution(job_id).await {
                Some(handle) => match self.launcher.stop(&handle).await {
                    Ok(()) => {
                        tracing::info!(job_id = %job_id, "Cancel request handed to running execution");
                        report.stopped.push(job_id);
                        false
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Cancel not possible, treating job as orphaned");
                        true
                    }
                },
                None if job.created_at < orphaned_before => {
                    tracing::info!(job_id = %job_id, created_at = %job.created_at, "Orphaned cancel request found");
                    true
                }
                None => {
                    report.waiting.push(job_id);
                    false
                }
            };
            if !orphaned {
                continue;
            }

            match self
                .write(job_id, "cancel confirmation", || Box::new(lifecycle::confirm_canceled::<S>))
                .await
            {
                Ok(_) => report.finalized.push(job_id),
                Err(CoordinatorError::InvalidState { .. }) | Err(CoordinatorError::JobNotFound(_)) => {
                    tracing::debug!(job_id = %job_id, "Cancel request already handled");
                    report.already_done.push(job_id);
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Finalizing cancel request failed");
                }
            }
        }

        if !report.is_empty() {
            tracing::info!(
                stopped = report.stopped.len(),
                finalized = report.finalized.len(),
                waiting = report.waiting.len(),
                "Cancel requests handled"
            );
        }
        Ok(report)
    }

    /// Sweep cancel requests until shutdown.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Cancel sweeper shutting down");
                    break;
                }
            }

            if let Err(e) = self.handle_cancel_requests().await {
                tracing::error!(error = %e, "Cancel request sweep failed");
            }
        }
    }

    async fn write<F>(&self, job_id: Uuid, action: &str, work: F) -> Result<Job<S>>
    where
        F: Fn() -> IsolatedWork<'static, S>,
    {
        let target = format!("{} of job {}", action, job_id);
        self.writer
            .execute(&target, || {
                let store = self.store.clone();
                let work = work();
                async move { store.run_isolated(job_id, work).await }
            })
            .await
    }
}
