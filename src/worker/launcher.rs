use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ExecutorConfig, StreamConfig};
use crate::error::{CoordinatorError, Result};
use crate::scheduler::job::{Job, JobState};
use crate::scheduler::lifecycle;
use crate::store::JobStore;
use crate::stream::{ResilientRetryExecutor, StreamRefresher};
use crate::worker::executor::{ExecutionOutcome, JobExecutor, StreamBuffers};

/// Reference to one execution of a job on this instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionHandle {
    pub job_id: Uuid,
    pub execution_id: Uuid,
}

/// Starts and controls executions of claimed jobs.
///
/// `launch` only has to start the work; completion is reported by the
/// execution itself through the store.
#[async_trait]
pub trait ExecutionLauncher<S: JobState>: Send + Sync {
    async fn launch(&self, job: &Job<S>) -> Result<ExecutionHandle>;

    /// Execution of `job_id` currently running on this instance, if any.
    async fn find_execution(&self, job_id: Uuid) -> Option<ExecutionHandle>;

    /// Ask the execution to stop. Its final state write still happens.
    async fn stop(&self, handle: &ExecutionHandle) -> Result<()>;

    /// Detach the execution. Whatever it produces afterwards is discarded.
    async fn abandon(&self, handle: &ExecutionHandle) -> Result<()>;
}

struct RunningExecution {
    handle: ExecutionHandle,
    stop: CancellationToken,
    abandoned: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<Uuid, RunningExecution>>>;

/// How long a stopped execution waits for the stopper's state change.
const STOP_SETTLE_CHECKS: u32 = 20;
const STOP_SETTLE_INTERVAL: Duration = Duration::from_millis(50);

/// Runs claimed jobs as local shell processes.
pub struct LocalLauncher<S: JobState> {
    store: Arc<dyn JobStore<S>>,
    executor: JobExecutor,
    stream_config: StreamConfig,
    result_write_retries: u32,
    executions: Registry,
}

impl<S: JobState> LocalLauncher<S> {
    pub fn new(
        store: Arc<dyn JobStore<S>>,
        executor_config: ExecutorConfig,
        stream_config: StreamConfig,
    ) -> Self {
        let result_write_retries = executor_config.result_write_retries;
        Self {
            store,
            executor: JobExecutor::new(executor_config),
            stream_config,
            result_write_retries,
            executions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of executions currently running on this instance
    pub async fn running_count(&self) -> usize {
        self.executions.lock().await.len()
    }

    // Earlier executions of the job, here or on a peer, lose write access.
    async fn bind(&self, handle: &ExecutionHandle) -> Result<()> {
        let job_id = handle.job_id;
        let execution_id = handle.execution_id;
        let target = format!("execution binding of job {}", job_id);
        ResilientRetryExecutor::new(self.result_write_retries)
            .execute(&target, || {
                let store = self.store.clone();
                async move {
                    store
                        .run_isolated(
                            job_id,
                            Box::new(move |job| lifecycle::bind_execution(job, execution_id)),
                        )
                        .await
                }
            })
            .await
            .map(|_| ())
            .map_err(|e| CoordinatorError::FatalLaunchFailure {
                job_id,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl<S: JobState> ExecutionLauncher<S> for LocalLauncher<S> {
    async fn launch(&self, job: &Job<S>) -> Result<ExecutionHandle> {
        let command = job.configuration().trim().to_string();
        if command.is_empty() {
            return Err(CoordinatorError::FatalLaunchFailure {
                job_id: job.id,
                reason: "job has no configuration to execute".to_string(),
            });
        }

        let handle = ExecutionHandle {
            job_id: job.id,
            execution_id: Uuid::new_v4(),
        };
        let stop = CancellationToken::new();
        let abandoned = CancellationToken::new();

        {
            let mut executions = self.executions.lock().await;
            if executions.contains_key(&job.id) {
                return Err(CoordinatorError::FatalLaunchFailure {
                    job_id: job.id,
                    reason: "an execution is already running on this instance".to_string(),
                });
            }
            self.bind(&handle).await?;
            executions.insert(
                job.id,
                RunningExecution {
                    handle: handle.clone(),
                    stop: stop.clone(),
                    abandoned: abandoned.clone(),
                },
            );
        }

        let execution = Execution {
            handle: handle.clone(),
            command,
            store: self.store.clone(),
            executor: self.executor.clone(),
            stream_config: self.stream_config.clone(),
            writer: ResilientRetryExecutor::new(self.result_write_retries),
            executions: self.executions.clone(),
        };
        tokio::spawn(execution.run(stop, abandoned));

        tracing::info!(
            job_id = %handle.job_id,
            execution_id = %handle.execution_id,
            "Execution launched"
        );
        Ok(handle)
    }

    async fn find_execution(&self, job_id: Uuid) -> Option<ExecutionHandle> {
        self.executions
            .lock()
            .await
            .get(&job_id)
            .map(|running| running.handle.clone())
    }

    async fn stop(&self, handle: &ExecutionHandle) -> Result<()> {
        let executions = self.executions.lock().await;
        match executions.get(&handle.job_id) {
            Some(running) if running.handle == *handle => {
                running.stop.cancel();
                tracing::info!(job_id = %handle.job_id, "Execution stop requested");
                Ok(())
            }
            _ => Err(not_running(handle)),
        }
    }

    async fn abandon(&self, handle: &ExecutionHandle) -> Result<()> {
        let mut executions = self.executions.lock().await;
        match executions.get(&handle.job_id) {
            Some(running) if running.handle == *handle => {
                running.abandoned.cancel();
                running.stop.cancel();
                executions.remove(&handle.job_id);
                tracing::info!(job_id = %handle.job_id, "Execution abandoned");
                Ok(())
            }
            _ => Err(not_running(handle)),
        }
    }
}

fn not_running(handle: &ExecutionHandle) -> CoordinatorError {
    CoordinatorError::Internal(format!(
        "execution {} of job {} is not running on this instance",
        handle.execution_id, handle.job_id
    ))
}

/// One spawned execution with everything it needs after `launch` returned.
struct Execution<S: JobState> {
    handle: ExecutionHandle,
    command: String,
    store: Arc<dyn JobStore<S>>,
    executor: JobExecutor,
    stream_config: StreamConfig,
    writer: ResilientRetryExecutor,
    executions: Registry,
}

impl<S: JobState> Execution<S> {
    async fn run(self, stop: CancellationToken, abandoned: CancellationToken) {
        let job_id = self.handle.job_id;
        let buffers = StreamBuffers::new();

        let watch = abandoned.child_token();
        let refresher = StreamRefresher::new(self.store.clone(), buffers.clone(), &self.stream_config)
            .for_execution(self.handle.execution_id);
        let watcher = {
            let watch = watch.clone();
            tokio::spawn(async move { refresher.run(job_id, watch).await })
        };

        let outcome = self
            .executor
            .execute(job_id, &self.command, &buffers, &stop)
            .await;

        watch.cancel();
        if let Err(e) = watcher.await {
            tracing::warn!(job_id = %job_id, error = %e, "Stream watcher task failed");
        }

        let mut settle_checks = 0;
        while !abandoned.is_cancelled() {
            match self.write_result(&outcome, &abandoned).await {
                Ok(()) => break,
                Err(CoordinatorError::InvalidState { reason, .. }) => {
                    if outcome.stopped
                        && settle_checks < STOP_SETTLE_CHECKS
                        && self.still_running().await
                    {
                        settle_checks += 1;
                        tokio::time::sleep(STOP_SETTLE_INTERVAL).await;
                        continue;
                    }
                    tracing::debug!(job_id = %job_id, reason, "Execution result not recorded");
                    break;
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to record execution result");
                    break;
                }
            }
        }
        if abandoned.is_cancelled() {
            tracing::debug!(job_id = %job_id, "Execution was abandoned, result discarded");
        }

        let mut executions = self.executions.lock().await;
        if executions
            .get(&job_id)
            .is_some_and(|running| running.handle == self.handle)
        {
            executions.remove(&job_id);
        }
    }

    // A stop is usually followed by the stopper's own state write.
    async fn still_running(&self) -> bool {
        matches!(
            self.store.find_by_id(self.handle.job_id).await,
            Ok(Some(job)) if job.execution_state.is_running() && job.is_owned_by(self.handle.execution_id)
        )
    }

    // Re-evaluated on every retry, so an abandon racing with the write is
    // still honored.
    async fn write_result(
        &self,
        outcome: &ExecutionOutcome,
        abandoned: &CancellationToken,
    ) -> Result<()> {
        let job_id = self.handle.job_id;
        let execution_id = self.handle.execution_id;
        let target = format!("result of job {}", job_id);
        let payload = serde_json::json!({
            "execution_id": self.handle.execution_id,
            "exit_code": outcome.exit_code,
            "stopped": outcome.stopped,
        })
        .to_string();

        self.writer
            .execute(&target, || {
                let store = self.store.clone();
                let abandoned = abandoned.clone();
                let output = outcome.output.clone();
                let error = outcome.error.clone();
                let payload = payload.clone();
                let result = outcome.result;
                let stopped = outcome.stopped;
                async move {
                    store
                        .run_isolated(
                            job_id,
                            Box::new(move |job| {
                                if abandoned.is_cancelled() {
                                    return Err(CoordinatorError::invalid_state(
                                        job_id,
                                        "execution abandoned",
                                    ));
                                }
                                if !job.is_owned_by(execution_id) {
                                    return Err(CoordinatorError::invalid_state(
                                        job_id,
                                        "job was handed to another execution",
                                    ));
                                }
                                if job.execution_state == S::cancel_requested() {
                                    lifecycle::record_streams(job, output, error);
                                    job.result_payload = Some(payload);
                                    return lifecycle::confirm_canceled(job);
                                }
                                if stopped {
                                    // whoever stopped us owns the state
                                    return Err(CoordinatorError::invalid_state(
                                        job_id,
                                        format!("execution stopped, job is in {}", job.execution_state),
                                    ));
                                }
                                lifecycle::mark_done(job, result)?;
                                lifecycle::record_streams(job, output, error);
                                job.result_payload = Some(payload);
                                Ok(())
                            }),
                        )
                        .await
                }
            })
            .await?;

        tracing::info!(job_id = %job_id, result = %outcome.result, "Execution result recorded");
        Ok(())
    }
}
