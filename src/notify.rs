use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobEventKind {
    JobStarted,
    JobCanceled,
    JobRestarted,
    /// Restart requested for a job that does not exist
    JobRestartCanceled,
    JobFailed,
}

impl fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobEventKind::JobStarted => write!(f, "JOB_STARTED"),
            JobEventKind::JobCanceled => write!(f, "JOB_CANCELED"),
            JobEventKind::JobRestarted => write!(f, "JOB_RESTARTED"),
            JobEventKind::JobRestartCanceled => write!(f, "JOB_RESTART_CANCELED"),
            JobEventKind::JobFailed => write!(f, "JOB_FAILED"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job_id: Uuid,
    pub payload: serde_json::Value,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, job_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            kind,
            job_id,
            payload,
        }
    }
}

/// Receiver of job lifecycle notifications. Fire-and-forget.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: JobEvent);
}

/// Writes every event to the log.
#[derive(Debug, Clone, Default)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn publish(&self, event: JobEvent) {
        tracing::info!(
            kind = %event.kind,
            job_id = %event.job_id,
            payload = %event.payload,
            "Job event"
        );
    }
}

/// Fans events out to any number of in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotificationSink {
    tx: broadcast::Sender<JobEvent>,
}

impl BroadcastNotificationSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastNotificationSink {
    fn publish(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}
