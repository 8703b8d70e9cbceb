use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::{CoordinatorError, Result};
use crate::scheduler::job::{Job, JobState, StreamKind};
use crate::store::JobStore;
use crate::stream::resilient::ResilientRetryExecutor;

/// Whether stream content last written at `last_update` is too old for a
/// refresh requested at `request_time`.
///
/// Never requested means never stale. Requested but never written means stale.
pub fn is_last_update_too_old(
    last_update: Option<DateTime<Utc>>,
    request_time: Option<DateTime<Utc>>,
    cache_timeout: Duration,
) -> bool {
    let Some(request_time) = request_time else {
        return false;
    };
    let Some(last_update) = last_update else {
        return true;
    };
    match (request_time - last_update).to_std() {
        Ok(gap) => gap > cache_timeout,
        // update written after the request
        Err(_) => false,
    }
}

/// Whether the execution side has an unanswered refresh request.
pub fn is_refresh_requested<S: JobState>(job: &Job<S>) -> bool {
    match (job.last_stream_refresh_request_at, job.last_stream_update_at) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(requested), Some(updated)) => requested > updated,
    }
}

/// Reader side of the stream refresh protocol.
///
/// Output of a running job is written into the store by the executing
/// instance only on request. A reader that finds stale content records a
/// refresh request and polls until the execution side has answered it.
pub struct StreamFreshnessCache<S: JobState> {
    config: StreamConfig,
    store: Arc<dyn JobStore<S>>,
    shutdown: CancellationToken,
}

impl<S: JobState> StreamFreshnessCache<S> {
    pub fn new(config: StreamConfig, store: Arc<dyn JobStore<S>>) -> Self {
        Self {
            config,
            store,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn is_last_update_too_old(
        &self,
        last_update: Option<DateTime<Utc>>,
        request_time: Option<DateTime<Utc>>,
    ) -> bool {
        is_last_update_too_old(last_update, request_time, self.config.cache_timeout())
    }

    /// Whether a fetch happening now needs fresher content than stored.
    ///
    /// Finished jobs are never refreshed; their output is final.
    pub fn is_update_necessary(&self, job: &Job<S>) -> bool {
        if !job.execution_state.is_running() {
            return false;
        }
        self.is_last_update_too_old(job.last_stream_update_at, Some(Utc::now()))
    }

    pub async fn fetch_output(&self, job_id: Uuid) -> Result<String> {
        tracing::info!(job_id = %job_id, "Fetching output stream");
        self.fetch_fresh_stream(job_id, StreamKind::Output).await
    }

    pub async fn fetch_error(&self, job_id: Uuid) -> Result<String> {
        tracing::info!(job_id = %job_id, "Fetching error stream");
        self.fetch_fresh_stream(job_id, StreamKind::Error).await
    }

    pub async fn fetch_fresh_stream(&self, job_id: Uuid, kind: StreamKind) -> Result<String> {
        let job = self.load(job_id).await?;
        if !self.is_update_necessary(&job) {
            return Ok(job.stream(kind).to_string());
        }

        let requested_at = self.mark_refresh_requested(job_id).await?;
        tracing::debug!(job_id = %job_id, "Waiting for stream refresh");

        let started = Instant::now();
        let mut checks = 0;
        while checks < self.config.max_poll_checks {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                _ = self.shutdown.cancelled() => return Err(CoordinatorError::ShuttingDown),
            }
            checks += 1;

            let current = self.load(job_id).await?;
            if !current.execution_state.is_running() {
                tracing::debug!(job_id = %job_id, state = %current.execution_state, "Job no longer running, stream data is final");
                return Ok(current.stream(kind).to_string());
            }
            if !self.is_last_update_too_old(current.last_stream_update_at, Some(requested_at)) {
                tracing::debug!(job_id = %job_id, checks, "Stream data refreshed");
                return Ok(current.stream(kind).to_string());
            }
            tracing::trace!(job_id = %job_id, checks, "Stream data still outdated");
        }

        let elapsed = started.elapsed();
        tracing::error!(
            job_id = %job_id,
            checks,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stream refresh timed out"
        );
        Err(CoordinatorError::Timeout {
            job_id,
            checks,
            elapsed,
        })
    }

    async fn load(&self, job_id: Uuid) -> Result<Job<S>> {
        self.store
            .find_by_id(job_id)
            .await?
            .ok_or(CoordinatorError::JobNotFound(job_id))
    }

    async fn mark_refresh_requested(&self, job_id: Uuid) -> Result<DateTime<Utc>> {
        let executor = ResilientRetryExecutor::new(self.config.refresh_mark_retries);
        let target = format!("stream refresh request of job {}", job_id);

        executor
            .execute(&target, || {
                let store = self.store.clone();
                async move {
                    let requested_at = Utc::now();
                    store
                        .run_isolated(
                            job_id,
                            Box::new(move |job| {
                                job.last_stream_refresh_request_at = Some(requested_at);
                                Ok(())
                            }),
                        )
                        .await?;
                    Ok(requested_at)
                }
            })
            .await
    }
}
