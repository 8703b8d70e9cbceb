//! Near-real-time partial output of running jobs.
//!
//! There is no push channel between the executing instance and a reader.
//! Both sides meet in the store:
//!
//! 1. A reader finds buffered output older than the cache window and records
//!    a refresh request ([`StreamFreshnessCache`]).
//! 2. The [`StreamRefresher`] running next to the execution sees the request
//!    and writes the current buffers.
//! 3. The reader, polling with a bounded number of checks, picks them up.

pub mod freshness;
pub mod refresher;
pub mod resilient;

pub use freshness::{is_last_update_too_old, StreamFreshnessCache};
pub use refresher::StreamRefresher;
pub use resilient::ResilientRetryExecutor;
