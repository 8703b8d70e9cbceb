//! Persistence boundary.
//!
//! The coordinators only see [`JobStore`]. The one guarantee they rely on is
//! row-version check-and-set: [`JobStore::save`] succeeds only when the
//! supplied version matches the stored one, and reports a
//! [`ConcurrencyConflict`](crate::error::CoordinatorError::ConcurrencyConflict)
//! otherwise.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::job::{ClaimStrategy, Job, JobState};

pub use memory::InMemoryJobStore;

/// Mutation applied inside [`JobStore::run_isolated`].
pub type IsolatedWork<'a, S> = Box<dyn FnOnce(&mut Job<S>) -> Result<()> + Send + 'a>;

#[async_trait]
pub trait JobStore<S: JobState>: Send + Sync {
    /// Insert a new job. Fails if the id is already taken.
    async fn create(&self, job: Job<S>) -> Result<Job<S>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job<S>>>;

    /// Oldest READY_TO_START job eligible under `strategy`.
    async fn find_next_claimable(&self, strategy: ClaimStrategy) -> Result<Option<Job<S>>>;

    /// All jobs currently in `state`, oldest first.
    async fn find_in_state(&self, state: S) -> Result<Vec<Job<S>>>;

    /// Versioned write. Returns the stored job carrying its new version.
    async fn save(&self, job: &Job<S>, expected_version: u64) -> Result<Job<S>>;

    /// Returns whether a job was removed.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Unit of work on a single job: load, apply `work`, versioned save.
    ///
    /// A concurrent writer between load and save makes the call fail with a
    /// conflict; nothing is written in that case.
    async fn run_isolated(&self, id: Uuid, work: IsolatedWork<'_, S>) -> Result<Job<S>>;
}
