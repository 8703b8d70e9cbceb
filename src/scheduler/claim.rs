use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::admin::JobProcessingSwitch;
use crate::config::ClaimConfig;
use crate::error::Result;
use crate::notify::{JobEvent, JobEventKind, NotificationSink};
use crate::scheduler::job::{Job, JobState};
use crate::scheduler::lifecycle;
use crate::scheduler::retry::RetryContext;
use crate::scheduler::timer::random_retry_wait;
use crate::store::JobStore;
use crate::stream::ResilientRetryExecutor;
use crate::worker::launcher::ExecutionLauncher;

/// How a single claim tick ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "job_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TickOutcome {
    /// Instance is shutting down
    Terminating,
    /// Job processing switched off cluster-wide
    Disabled,
    NoJobReady,
    Claimed(Uuid),
    /// Claimed, but the launcher refused it; the job was marked failed
    LaunchFailed(Uuid),
    /// Store error other than a conflict
    StoreFailure,
    /// Every attempt lost against another claimer
    RetriesExhausted,
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickOutcome::Terminating => write!(f, "terminating"),
            TickOutcome::Disabled => write!(f, "disabled"),
            TickOutcome::NoJobReady => write!(f, "no job ready"),
            TickOutcome::Claimed(id) => write!(f, "claimed {}", id),
            TickOutcome::LaunchFailed(id) => write!(f, "launch of {} failed", id),
            TickOutcome::StoreFailure => write!(f, "store failure"),
            TickOutcome::RetriesExhausted => write!(f, "retries exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub outcome: TickOutcome,
    /// Conflicts met during the tick
    pub conflicts: u32,
}

/// Periodic "claim the next ready job" trigger.
///
/// Every instance runs one of these against the shared store. There is no
/// leader: the versioned write in [`JobStore::save`] decides which instance
/// gets a job, and a losing instance backs off for a random time before
/// looking again.
pub struct ClusterJobClaimCoordinator<S: JobState> {
    config: ClaimConfig,
    store: Arc<dyn JobStore<S>>,
    launcher: Arc<dyn ExecutionLauncher<S>>,
    notifications: Arc<dyn NotificationSink>,
    switch: Arc<dyn JobProcessingSwitch>,
    shutdown: CancellationToken,
}

impl<S: JobState> ClusterJobClaimCoordinator<S> {
    pub fn new(
        config: ClaimConfig,
        store: Arc<dyn JobStore<S>>,
        launcher: Arc<dyn ExecutionLauncher<S>>,
        notifications: Arc<dyn NotificationSink>,
        switch: Arc<dyn JobProcessingSwitch>,
    ) -> Self {
        Self {
            config,
            store,
            launcher,
            notifications,
            switch,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Tick until shutdown, starting after the configured initial delay.
    pub async fn run(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.initial_delay()) => {}
            _ = self.shutdown.cancelled() => return,
        }

        let mut interval = tokio::time::interval(self.config.tick_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Claim loop shutting down");
                    break;
                }
            }

            let report = self.trigger_next_job().await;
            tracing::trace!(outcome = %report.outcome, conflicts = report.conflicts, "Claim tick done");
        }
    }

    /// Run one claim tick.
    pub async fn trigger_next_job(&self) -> TickReport {
        if self.shutdown.is_cancelled() {
            tracing::debug!("Instance terminating, skipping claim tick");
            return Self::report(TickOutcome::Terminating, 0);
        }
        if !self.switch.is_job_processing_enabled() {
            tracing::warn!("Job processing disabled, skipping claim tick");
            return Self::report(TickOutcome::Disabled, 0);
        }

        let strategy = self.config.strategy;
        let max_backoff_ms = self.config.effective_max_backoff_ms();
        let mut retry =
            RetryContext::new(self.config.max_retries).with_cancellation(self.shutdown.clone());
        let mut conflicts = 0;

        loop {
            let candidate = match self.store.find_next_claimable(strategy).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    retry.execution_done();
                    return Self::report(TickOutcome::NoJobReady, conflicts);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Looking up next job failed");
                    retry.mark_as_fatal_failure();
                    return Self::report(TickOutcome::StoreFailure, conflicts);
                }
            };

            match self.claim(candidate).await {
                Ok(job) => {
                    let outcome = self.dispatch(job, &mut retry).await;
                    return Self::report(outcome, conflicts);
                }
                Err(e) if e.is_conflict() => {
                    conflicts += 1;
                    retry.set_retry_time_to_wait(random_retry_wait(max_backoff_ms));
                    retry.execution_failed().await;
                    tracing::debug!(
                        attempt = retry.execution_failed_count(),
                        error = %e,
                        "Job was claimed concurrently, retrying"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Claiming job failed");
                    retry.mark_as_fatal_failure();
                    return Self::report(TickOutcome::StoreFailure, conflicts);
                }
            }

            if !retry.is_retry_possible() {
                break;
            }
        }

        if self.shutdown.is_cancelled() {
            return Self::report(TickOutcome::Terminating, conflicts);
        }
        tracing::warn!(
            attempts = retry.execution_failed_count(),
            max_retries = retry.maximum(),
            "Was not able to claim a job, retries exhausted"
        );
        Self::report(TickOutcome::RetriesExhausted, conflicts)
    }

    async fn claim(&self, mut job: Job<S>) -> Result<Job<S>> {
        let version = job.row_version;
        lifecycle::claim(&mut job)?;
        self.store.save(&job, version).await
    }

    async fn dispatch(&self, job: Job<S>, retry: &mut RetryContext) -> TickOutcome {
        tracing::info!(job_id = %job.id, owner = %job.owner, flavor = S::FLAVOR, "Job claimed");
        self.notifications.publish(JobEvent::new(
            JobEventKind::JobStarted,
            job.id,
            serde_json::json!({ "owner": job.owner, "started_at": job.started_at }),
        ));

        match self.launcher.launch(&job).await {
            Ok(handle) => {
                tracing::debug!(job_id = %job.id, execution_id = %handle.execution_id, "Job launched");
                retry.execution_done();
                TickOutcome::Claimed(job.id)
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    attempts = retry.execution_failed_count() + 1,
                    error = %e,
                    "Job launch failed, marking job as failed"
                );
                retry.mark_as_fatal_failure();
                if let Err(mark_err) = self.mark_failed(job.id).await {
                    tracing::error!(job_id = %job.id, error = %mark_err, "Could not mark job as failed");
                }
                self.notifications.publish(JobEvent::new(
                    JobEventKind::JobFailed,
                    job.id,
                    serde_json::json!({ "reason": e.to_string() }),
                ));
                TickOutcome::LaunchFailed(job.id)
            }
        }
    }

    async fn mark_failed(&self, job_id: Uuid) -> Result<Job<S>> {
        let target = format!("failure mark of job {}", job_id);
        ResilientRetryExecutor::new(self.config.max_retries)
            .execute(&target, || {
                let store = self.store.clone();
                async move {
                    store
                        .run_isolated(job_id, Box::new(lifecycle::mark_failed::<S>))
                        .await
                }
            })
            .await
    }

    fn report(outcome: TickOutcome, conflicts: u32) -> TickReport {
        TickReport { outcome, conflicts }
    }
}
