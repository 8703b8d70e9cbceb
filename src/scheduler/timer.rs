use rand::Rng;
use std::time::Duration;

use crate::config::MINIMUM_RETRY_WAIT_MS;

/// Random wait before retrying a lost claim, uniform in `[10ms, max_ms)`.
///
/// Members started at the same moment pick different waits, which spreads
/// their next store access apart.
pub fn random_retry_wait(max_ms: u64) -> Duration {
    let upper = max_ms.max(MINIMUM_RETRY_WAIT_MS + 1);
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(MINIMUM_RETRY_WAIT_MS..upper))
}
