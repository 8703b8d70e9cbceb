use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::{CoordinatorError, Result};
use crate::scheduler::job::{Job, JobState};
use crate::scheduler::lifecycle;
use crate::store::JobStore;
use crate::stream::freshness::is_refresh_requested;
use crate::stream::resilient::ResilientRetryExecutor;
use crate::worker::executor::StreamBuffers;

/// Execution side of the stream refresh protocol.
///
/// Runs next to an execution and answers refresh requests by writing the
/// current buffers into the store.
pub struct StreamRefresher<S: JobState> {
    store: Arc<dyn JobStore<S>>,
    buffers: StreamBuffers,
    watch_interval: Duration,
    executor: ResilientRetryExecutor,
    execution_id: Option<Uuid>,
}

impl<S: JobState> StreamRefresher<S> {
    pub fn new(store: Arc<dyn JobStore<S>>, buffers: StreamBuffers, config: &StreamConfig) -> Self {
        Self {
            store,
            buffers,
            watch_interval: config.watch_interval(),
            executor: ResilientRetryExecutor::new(config.stream_write_retries),
            execution_id: None,
        }
    }

    /// Only write while `execution_id` still owns the job.
    pub fn for_execution(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    fn owns(&self, job: &Job<S>) -> bool {
        self.execution_id.map_or(true, |id| job.is_owned_by(id))
    }

    /// Watch for refresh requests until `token` is cancelled.
    pub async fn run(&self, job_id: Uuid, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.watch_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = token.cancelled() => break,
            }

            if let Err(e) = self.refresh_if_requested(job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "Stream refresh failed");
            }
        }
        tracing::trace!(job_id = %job_id, "Stream refresh watcher stopped");
    }

    /// Write the buffers if a reader asked for it. Returns whether a write happened.
    pub async fn refresh_if_requested(&self, job_id: Uuid) -> Result<bool> {
        let Some(job) = self.store.find_by_id(job_id).await? else {
            return Ok(false);
        };
        if !job.execution_state.is_running() || !is_refresh_requested(&job) {
            return Ok(false);
        }
        if !self.owns(&job) {
            tracing::debug!(job_id = %job_id, "Job belongs to another execution, not refreshing");
            return Ok(false);
        }

        let target = format!("stream update of job {}", job_id);
        self.executor
            .execute(&target, || {
                let store = self.store.clone();
                let (output, error) = self.buffers.snapshot();
                let execution_id = self.execution_id;
                async move {
                    store
                        .run_isolated(
                            job_id,
                            Box::new(move |job| {
                                if execution_id.is_some() && job.current_execution != execution_id {
                                    return Err(CoordinatorError::invalid_state(
                                        job_id,
                                        "job was handed to another execution",
                                    ));
                                }
                                lifecycle::record_streams(job, output, error);
                                Ok(())
                            }),
                        )
                        .await
                }
            })
            .await?;

        tracing::debug!(job_id = %job_id, "Stream data written on request");
        Ok(true)
    }
}
