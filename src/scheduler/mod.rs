//! Job coordination on top of a shared store.
//!
//! - [`job`] and [`lifecycle`]: the record and its guarded transitions
//! - [`claim`]: the per-instance "claim next ready job" tick
//! - [`cancel`]: administrative cancel/restart and the orphan sweeper
//! - [`zombie`]: startup report of jobs left running
//! - [`retry`] and [`timer`]: retry bookkeeping and randomized backoff

pub mod cancel;
pub mod claim;
pub mod job;
pub mod lifecycle;
pub mod retry;
pub mod timer;
pub mod zombie;

pub use cancel::{CancelOutcome, CancellationAndRestartCoordinator, RestartOutcome, SweepReport};
pub use claim::{ClusterJobClaimCoordinator, TickOutcome, TickReport};
pub use job::{
    ClaimStrategy, ExecutionResult, Job, JobState, ScanJob, ScanJobState, StreamKind, WorkItem,
    WorkItemState,
};
pub use retry::RetryContext;
pub use zombie::{ZombieJobDetector, ZombieReport};
