use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a job execution. `None` until the job finished one way or another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionResult {
    None,
    Ok,
    Failed,
}

impl ExecutionResult {
    pub fn has_finished(self) -> bool {
        self != ExecutionResult::None
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionResult::None => write!(f, "NONE"),
            ExecutionResult::Ok => write!(f, "OK"),
            ExecutionResult::Failed => write!(f, "FAILED"),
        }
    }
}

/// Which buffered stream a reader is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamKind {
    Output,
    Error,
}

/// Selection rule for the next job a claim tick picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStrategy {
    /// Oldest ready job by creation time
    #[default]
    OldestFirst,
    /// Oldest ready job whose owner has no running job
    OnePerOwner,
}

/// State enumeration of one job flavor.
///
/// Both flavors walk the same lifecycle; this trait maps the lifecycle's
/// abstract positions onto the concrete enum values so the transitions in
/// [`lifecycle`](crate::scheduler::lifecycle) are written once.
pub trait JobState:
    Copy + Eq + fmt::Debug + fmt::Display + Serialize + Send + Sync + 'static
{
    /// Flavor name used in logs and events
    const FLAVOR: &'static str;

    fn initial() -> Self;
    fn ready_to_start() -> Self;
    fn running() -> Self;
    fn cancel_requested() -> Self;
    /// Final state after a confirmed cancellation
    fn canceled() -> Self;
    /// Terminal state for an execution that ended with `result`
    fn ended(result: ExecutionResult) -> Self;
    fn is_terminal(self) -> bool;

    fn is_running(self) -> bool {
        self == Self::running()
    }
}

/// Orchestrator-side state of a scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanJobState {
    Initializing,
    ReadyToStart,
    Started,
    CancelRequested,
    Ended,
}

impl fmt::Display for ScanJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanJobState::Initializing => write!(f, "INITIALIZING"),
            ScanJobState::ReadyToStart => write!(f, "READY_TO_START"),
            ScanJobState::Started => write!(f, "STARTED"),
            ScanJobState::CancelRequested => write!(f, "CANCEL_REQUESTED"),
            ScanJobState::Ended => write!(f, "ENDED"),
        }
    }
}

impl JobState for ScanJobState {
    const FLAVOR: &'static str = "scan-job";

    fn initial() -> Self {
        ScanJobState::Initializing
    }

    fn ready_to_start() -> Self {
        ScanJobState::ReadyToStart
    }

    fn running() -> Self {
        ScanJobState::Started
    }

    fn cancel_requested() -> Self {
        ScanJobState::CancelRequested
    }

    // A cancel request is already final for scan jobs.
    fn canceled() -> Self {
        ScanJobState::CancelRequested
    }

    fn ended(_result: ExecutionResult) -> Self {
        ScanJobState::Ended
    }

    fn is_terminal(self) -> bool {
        matches!(self, ScanJobState::Ended | ScanJobState::CancelRequested)
    }
}

/// Execution-side state of a delegated work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkItemState {
    Created,
    ReadyToStart,
    Running,
    CancelRequested,
    Done,
    Failed,
    Canceled,
}

impl fmt::Display for WorkItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItemState::Created => write!(f, "CREATED"),
            WorkItemState::ReadyToStart => write!(f, "READY_TO_START"),
            WorkItemState::Running => write!(f, "RUNNING"),
            WorkItemState::CancelRequested => write!(f, "CANCEL_REQUESTED"),
            WorkItemState::Done => write!(f, "DONE"),
            WorkItemState::Failed => write!(f, "FAILED"),
            WorkItemState::Canceled => write!(f, "CANCELED"),
        }
    }
}

impl JobState for WorkItemState {
    const FLAVOR: &'static str = "work-item";

    fn initial() -> Self {
        WorkItemState::Created
    }

    fn ready_to_start() -> Self {
        WorkItemState::ReadyToStart
    }

    fn running() -> Self {
        WorkItemState::Running
    }

    fn cancel_requested() -> Self {
        WorkItemState::CancelRequested
    }

    fn canceled() -> Self {
        WorkItemState::Canceled
    }

    fn ended(result: ExecutionResult) -> Self {
        match result {
            ExecutionResult::Ok => WorkItemState::Done,
            ExecutionResult::Failed | ExecutionResult::None => WorkItemState::Failed,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkItemState::CancelRequested
                | WorkItemState::Done
                | WorkItemState::Failed
                | WorkItemState::Canceled
        )
    }
}

/// A job record as persisted in the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job<S> {
    pub id: Uuid,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub execution_state: S,
    pub execution_result: ExecutionResult,
    configuration: String,
    pub result_payload: Option<String>,
    pub output_stream: String,
    pub error_stream: String,
    pub last_stream_update_at: Option<DateTime<Utc>>,
    pub last_stream_refresh_request_at: Option<DateTime<Utc>>,
    /// Execution allowed to write results and streams for this job
    pub current_execution: Option<Uuid>,
    /// Maintained by the store; a write must carry the version it read
    pub row_version: u64,
}

pub type ScanJob = Job<ScanJobState>;
pub type WorkItem = Job<WorkItemState>;

impl<S: JobState> Job<S> {
    pub fn new(owner: impl Into<String>, configuration: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), owner, configuration, Utc::now())
    }

    pub fn with_id(
        id: Uuid,
        owner: impl Into<String>,
        configuration: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner: owner.into(),
            created_at,
            started_at: None,
            ended_at: None,
            execution_state: S::initial(),
            execution_result: ExecutionResult::None,
            configuration: configuration.into(),
            result_payload: None,
            output_stream: String::new(),
            error_stream: String::new(),
            last_stream_update_at: None,
            last_stream_refresh_request_at: None,
            current_execution: None,
            row_version: 0,
        }
    }

    /// What to execute. Written once at creation.
    pub fn configuration(&self) -> &str {
        &self.configuration
    }

    pub fn stream(&self, kind: StreamKind) -> &str {
        match kind {
            StreamKind::Output => &self.output_stream,
            StreamKind::Error => &self.error_stream,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.execution_state.is_terminal()
    }

    pub fn is_owned_by(&self, execution_id: Uuid) -> bool {
        self.current_execution == Some(execution_id)
    }
}
