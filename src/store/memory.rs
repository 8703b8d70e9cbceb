use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{CoordinatorError, Result};
use crate::scheduler::job::{ClaimStrategy, Job, JobState};
use crate::store::{IsolatedWork, JobStore};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Shared in-process store with row-version semantics.
///
/// Each call holds the lock only for its own duration, so two instances
/// sharing one store interleave exactly like two processes sharing a database.
#[derive(Debug)]
pub struct InMemoryJobStore<S> {
    jobs: RwLock<HashMap<Uuid, Job<S>>>,
    max_jobs: usize,
}

impl<S: JobState> Default for InMemoryJobStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: JobState> InMemoryJobStore<S> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_jobs,
        }
    }

    /// All jobs sorted chronologically by creation time
    pub async fn all_jobs(&self) -> Vec<Job<S>> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<Job<S>> = jobs.values().cloned().collect();
        all.sort_by_key(|j| j.created_at);
        all
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl<S: JobState> JobStore<S> for InMemoryJobStore<S> {
    async fn create(&self, mut job: Job<S>) -> Result<Job<S>> {
        let mut jobs = self.jobs.write().await;
        if jobs.len() >= self.max_jobs {
            return Err(CoordinatorError::Store(format!(
                "store at capacity ({} jobs)",
                self.max_jobs
            )));
        }
        if jobs.contains_key(&job.id) {
            return Err(CoordinatorError::Store(format!(
                "job {} already exists",
                job.id
            )));
        }
        job.row_version = 0;
        jobs.insert(job.id, job.clone());
        tracing::debug!(job_id = %job.id, flavor = S::FLAVOR, "Job created");
        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job<S>>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn find_next_claimable(&self, strategy: ClaimStrategy) -> Result<Option<Job<S>>> {
        let jobs = self.jobs.read().await;

        let busy_owners: HashSet<&str> = match strategy {
            ClaimStrategy::OldestFirst => HashSet::new(),
            ClaimStrategy::OnePerOwner => jobs
                .values()
                .filter(|j| j.execution_state.is_running())
                .map(|j| j.owner.as_str())
                .collect(),
        };

        Ok(jobs
            .values()
            .filter(|j| j.execution_state == S::ready_to_start())
            .filter(|j| !busy_owners.contains(j.owner.as_str()))
            .min_by_key(|j| (j.created_at, j.id))
            .cloned())
    }

    async fn find_in_state(&self, state: S) -> Result<Vec<Job<S>>> {
        let jobs = self.jobs.read().await;
        let mut found: Vec<Job<S>> = jobs
            .values()
            .filter(|j| j.execution_state == state)
            .cloned()
            .collect();
        found.sort_by_key(|j| j.created_at);
        Ok(found)
    }

    async fn save(&self, job: &Job<S>, expected_version: u64) -> Result<Job<S>> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&job.id)
            .ok_or(CoordinatorError::JobNotFound(job.id))?;

        if stored.row_version != expected_version {
            return Err(CoordinatorError::ConcurrencyConflict {
                job_id: job.id,
                expected: expected_version,
                actual: stored.row_version,
            });
        }

        let mut updated = job.clone();
        updated.row_version = expected_version + 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.jobs.write().await.remove(&id).is_some())
    }

    async fn run_isolated(&self, id: Uuid, work: IsolatedWork<'_, S>) -> Result<Job<S>> {
        let mut job = self
            .find_by_id(id)
            .await?
            .ok_or(CoordinatorError::JobNotFound(id))?;
        let read_version = job.row_version;
        work(&mut job)?;
        self.save(&job, read_version).await
    }
}
