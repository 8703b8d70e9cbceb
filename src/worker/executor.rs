use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::scheduler::job::ExecutionResult;

/// How long output readers may drain after the process is gone.
const READER_GRACE: Duration = Duration::from_secs(1);

/// Output captured so far by a running execution.
///
/// Shared between the reader tasks and the stream refresher.
#[derive(Debug, Clone, Default)]
pub struct StreamBuffers {
    output: Arc<Mutex<String>>,
    error: Arc<Mutex<String>>,
}

impl StreamBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_output(&self, text: &str) {
        append(&self.output, text);
    }

    pub fn append_error(&self, text: &str) {
        append(&self.error, text);
    }

    /// Copy of (output, error)
    pub fn snapshot(&self) -> (String, String) {
        (read(&self.output), read(&self.error))
    }
}

fn append(buffer: &Mutex<String>, text: &str) {
    match buffer.lock() {
        Ok(mut b) => b.push_str(text),
        Err(poisoned) => poisoned.into_inner().push_str(text),
    }
}

fn read(buffer: &Mutex<String>) -> String {
    match buffer.lock() {
        Ok(b) => b.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Result of job execution
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub job_id: Uuid,
    pub result: ExecutionResult,
    pub exit_code: Option<i32>,
    pub output: String,
    pub error: String,
    /// Execution was ended by a stop request
    pub stopped: bool,
}

/// Runs a job configuration as a shell command.
///
/// Stdout and stderr are captured line by line into [`StreamBuffers`] while
/// the process runs, so partial output can be served before it ends.
#[derive(Debug, Clone)]
pub struct JobExecutor {
    config: ExecutorConfig,
}

impl Default for JobExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl JobExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Execute `command`, killing the process when `stop` is cancelled.
    pub async fn execute(
        &self,
        job_id: Uuid,
        command: &str,
        buffers: &StreamBuffers,
        stop: &CancellationToken,
    ) -> ExecutionOutcome {
        tracing::info!(job_id = %job_id, command, shell = %self.config.shell, "Executing job");

        let spawned = Command::new(&self.config.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Job execution failed");
                buffers.append_error(&e.to_string());
                return Self::outcome(job_id, ExecutionResult::Failed, None, buffers, false);
            }
        };

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let buffers = buffers.clone();
            readers.push(spawn_reader(stdout, move |line| buffers.append_output(line)));
        }
        if let Some(stderr) = child.stderr.take() {
            let buffers = buffers.clone();
            readers.push(spawn_reader(stderr, move |line| buffers.append_error(line)));
        }

        let (status, stopped) = tokio::select! {
            status = child.wait() => (Some(status), false),
            _ = stop.cancelled() => {
                tracing::info!(job_id = %job_id, "Stop requested, killing process");
                if let Err(e) = child.kill().await {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to kill process");
                }
                (None, true)
            }
        };

        finish_readers(readers, stopped).await;

        let (result, exit_code) = match status {
            Some(Ok(status)) if status.success() => (ExecutionResult::Ok, status.code()),
            Some(Ok(status)) => {
                let (_, error) = buffers.snapshot();
                if error.is_empty() {
                    buffers.append_error(&format!("Exit code: {:?}", status.code()));
                }
                (ExecutionResult::Failed, status.code())
            }
            Some(Err(e)) => {
                tracing::error!(job_id = %job_id, error = %e, "Waiting for process failed");
                buffers.append_error(&e.to_string());
                (ExecutionResult::Failed, None)
            }
            None => (ExecutionResult::Failed, None),
        };

        tracing::info!(
            job_id = %job_id,
            result = %result,
            exit_code = ?exit_code,
            stopped,
            "Job execution finished"
        );

        Self::outcome(job_id, result, exit_code, buffers, stopped)
    }

    fn outcome(
        job_id: Uuid,
        result: ExecutionResult,
        exit_code: Option<i32>,
        buffers: &StreamBuffers,
        stopped: bool,
    ) -> ExecutionOutcome {
        let (output, error) = buffers.snapshot();
        ExecutionOutcome {
            job_id,
            result,
            exit_code,
            output,
            error,
            stopped,
        }
    }
}

fn spawn_reader<R, F>(stream: R, mut sink: F) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnMut(&str) + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            sink(&line);
            sink("\n");
        }
    })
}

// Background children of the shell can keep a pipe open after the shell
// itself exited, so readers only get a short grace period.
async fn finish_readers(readers: Vec<JoinHandle<()>>, stopped: bool) {
    for mut reader in readers {
        if stopped {
            reader.abort();
            continue;
        }
        if tokio::time::timeout(READER_GRACE, &mut reader).await.is_err() {
            reader.abort();
        }
    }
}
