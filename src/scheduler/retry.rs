use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Bookkeeping for one logical operation that may be retried.
///
/// The context does not know what is retried. Callers loop while
/// [`is_retry_possible`](Self::is_retry_possible) holds and report each
/// attempt's outcome.
#[derive(Debug)]
pub struct RetryContext {
    maximum: u32,
    failure_count: u32,
    done: bool,
    fatal: bool,
    retry_time_to_wait: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl RetryContext {
    pub fn new(maximum: u32) -> Self {
        Self {
            maximum,
            failure_count: 0,
            done: false,
            fatal: false,
            retry_time_to_wait: None,
            cancel: None,
        }
    }

    /// Make waits abortable. A cancelled wait ends all further retries.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn set_retry_time_to_wait(&mut self, wait: Duration) -> &mut Self {
        self.retry_time_to_wait = Some(wait);
        self
    }

    /// Record a failed attempt and wait the configured time, if any.
    pub async fn execution_failed(&mut self) {
        self.failure_count += 1;

        let Some(wait) = self.retry_time_to_wait else {
            return;
        };
        if wait.is_zero() {
            return;
        }

        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = token.cancelled() => {
                        tracing::debug!("Retry wait cancelled");
                        self.fatal = true;
                    }
                }
            }
            None => tokio::time::sleep(wait).await,
        }
    }

    pub fn execution_done(&mut self) {
        self.done = true;
    }

    pub fn mark_as_fatal_failure(&mut self) {
        self.fatal = true;
    }

    pub fn is_retry_possible(&self) -> bool {
        !self.done && !self.fatal && self.failure_count < self.maximum
    }

    pub fn is_execution_done(&self) -> bool {
        self.done
    }

    pub fn is_fatal_failure(&self) -> bool {
        self.fatal
    }

    pub fn execution_failed_count(&self) -> u32 {
        self.failure_count
    }

    pub fn maximum(&self) -> u32 {
        self.maximum
    }
}
