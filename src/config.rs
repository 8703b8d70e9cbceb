use std::time::Duration;

use crate::scheduler::ClaimStrategy;

/// Lower bound for the randomized wait before a claim retry.
pub const MINIMUM_RETRY_WAIT_MS: u64 = 10;

/// Configuration for the periodic "claim next job" trigger.
///
/// Every cluster member runs its own trigger. Retries only happen when the
/// store reports that another member modified the job first.
#[derive(Debug, Clone)]
pub struct ClaimConfig {
    /// Failed claim attempts tolerated per tick before giving up
    pub max_retries: u32,
    /// Upper bound of the randomized wait before a retry
    pub max_backoff_ms: u64,
    /// Delay between two ticks
    pub tick_interval_ms: u64,
    /// Delay before the first tick. Useful to spread a cluster booted at once.
    pub initial_delay_ms: u64,
    /// Which ready job a tick picks
    pub strategy: ClaimStrategy,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_backoff_ms: 300,
            tick_interval_ms: 10_000,
            initial_delay_ms: 5_000,
            strategy: ClaimStrategy::OldestFirst,
        }
    }
}

impl ClaimConfig {
    /// Backoff upper bound with the floor applied.
    ///
    /// A window below [`MINIMUM_RETRY_WAIT_MS`] cannot produce a random value,
    /// so it is replaced by the floor plus 100ms.
    pub fn effective_max_backoff_ms(&self) -> u64 {
        if self.max_backoff_ms <= MINIMUM_RETRY_WAIT_MS {
            tracing::warn!(
                configured_ms = self.max_backoff_ms,
                recalculated_ms = MINIMUM_RETRY_WAIT_MS + 100,
                "Claim retry backoff window below floor, recalculated"
            );
            MINIMUM_RETRY_WAIT_MS + 100
        } else {
            self.max_backoff_ms
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

/// Configuration for near-real-time stream output of running jobs.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Maximum tolerated age of buffered stream content
    pub cache_timeout_ms: u64,
    /// How often a reader re-checks the store after requesting a refresh
    pub max_poll_checks: u32,
    pub poll_interval_ms: u64,
    /// Retries for marking a refresh request when readers race each other
    pub refresh_mark_retries: u32,
    /// How often the execution side looks for refresh requests
    pub watch_interval_ms: u64,
    /// Retries for the execution side's stream writes
    pub stream_write_retries: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            cache_timeout_ms: 2_000,
            max_poll_checks: 10,
            poll_interval_ms: 500,
            refresh_mark_retries: 3,
            watch_interval_ms: 300,
            stream_write_retries: 3,
        }
    }
}

impl StreamConfig {
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct CancelConfig {
    /// Age after which a cancel request without a running execution is finalized
    pub orphan_after_minutes: i64,
    pub sweep_interval_ms: u64,
    /// Retries for cancel/restart writes racing with the execution side
    pub write_retries: u32,
}

impl Default for CancelConfig {
    fn default() -> Self {
        Self {
            orphan_after_minutes: 60,
            sweep_interval_ms: 10_000,
            write_retries: 3,
        }
    }
}

impl CancelConfig {
    pub fn orphan_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.orphan_after_minutes)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Configuration for local shell execution of claimed jobs.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Shell used to run a job configuration (`<shell> -c <configuration>`)
    pub shell: String,
    /// Retries for result writes racing with readers
    pub result_write_retries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            result_write_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name of this instance, used in logs only
    pub instance_id: String,
    pub claim: ClaimConfig,
    pub stream: StreamConfig,
    pub cancel: CancelConfig,
    pub executor: ExecutorConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            instance_id: "instance-1".to_string(),
            claim: ClaimConfig::default(),
            stream: StreamConfig::default(),
            cancel: CancelConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Default::default()
        }
    }

    pub fn with_claim(mut self, claim: ClaimConfig) -> Self {
        self.claim = claim;
        self
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelConfig) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_config_default() {
        let cfg = ClaimConfig::default();
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.max_backoff_ms, 300);
        assert_eq!(cfg.tick_interval(), Duration::from_secs(10));
        assert_eq!(cfg.initial_delay(), Duration::from_secs(5));
        assert_eq!(cfg.strategy, ClaimStrategy::OldestFirst);
    }

    #[test]
    fn claim_config_backoff_floor() {
        let mut cfg = ClaimConfig::default();
        assert_eq!(cfg.effective_max_backoff_ms(), 300);

        cfg.max_backoff_ms = 5;
        assert_eq!(cfg.effective_max_backoff_ms(), 110);

        cfg.max_backoff_ms = MINIMUM_RETRY_WAIT_MS;
        assert_eq!(cfg.effective_max_backoff_ms(), 110);
    }

    #[test]
    fn stream_config_default() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.cache_timeout(), Duration::from_millis(2000));
        assert_eq!(cfg.max_poll_checks, 10);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(500));
        assert_eq!(cfg.refresh_mark_retries, 3);
        assert_eq!(cfg.watch_interval(), Duration::from_millis(300));
        assert_eq!(cfg.stream_write_retries, 3);
    }

    #[test]
    fn cancel_config_default() {
        let cfg = CancelConfig::default();
        assert_eq!(cfg.orphan_after(), chrono::Duration::minutes(60));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(10));
        assert_eq!(cfg.write_retries, 3);
    }

    #[test]
    fn coordinator_config_builders() {
        let cfg = CoordinatorConfig::new("node-a")
            .with_claim(ClaimConfig {
                max_retries: 1,
                ..Default::default()
            })
            .with_stream(StreamConfig {
                poll_interval_ms: 10,
                ..Default::default()
            });
        assert_eq!(cfg.instance_id, "node-a");
        assert_eq!(cfg.claim.max_retries, 1);
        assert_eq!(cfg.stream.poll_interval_ms, 10);
        assert_eq!(cfg.executor.shell, "sh");
    }
}
