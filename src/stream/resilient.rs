use std::future::Future;
use std::time::Duration;

use crate::error::{CoordinatorError, Result};
use crate::scheduler::retry::RetryContext;

/// Retries a store write when another writer modified the row first.
///
/// Only [`ConcurrencyConflict`](CoordinatorError::ConcurrencyConflict) is
/// retried; any other error is returned as is. One success is enough, so this
/// fits writes where racing callers all want the same effect (e.g. several
/// readers requesting a stream refresh at once).
#[derive(Debug, Clone)]
pub struct ResilientRetryExecutor {
    max_retries: u32,
    wait_before_retry: Duration,
}

impl ResilientRetryExecutor {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            wait_before_retry: Duration::ZERO,
        }
    }

    pub fn with_wait_before_retry(mut self, wait: Duration) -> Self {
        self.wait_before_retry = wait;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `operation` up to `1 + max_retries` times.
    ///
    /// `target` names the affected entity in logs and in the final error.
    pub async fn execute<T, F, Fut>(&self, target: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = RetryContext::new(self.max_retries + 1);
        if !self.wait_before_retry.is_zero() {
            retry.set_retry_time_to_wait(self.wait_before_retry);
        }

        loop {
            match operation().await {
                Ok(value) => {
                    retry.execution_done();
                    return Ok(value);
                }
                Err(e) if e.is_conflict() => {
                    retry.execution_failed().await;
                    if !retry.is_retry_possible() {
                        tracing::warn!(
                            target_name = target,
                            attempts = retry.execution_failed_count(),
                            error = %e,
                            "Giving up after repeated concurrent modifications"
                        );
                        return Err(CoordinatorError::RetriesExhausted {
                            target: target.to_string(),
                            attempts: retry.execution_failed_count(),
                            last_error: e.to_string(),
                        });
                    }
                    tracing::debug!(
                        target_name = target,
                        attempt = retry.execution_failed_count(),
                        "Concurrent modification, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
