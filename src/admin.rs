use std::sync::atomic::{AtomicBool, Ordering};

/// Cluster-wide pause switch consulted before every claim tick.
pub trait JobProcessingSwitch: Send + Sync {
    fn is_job_processing_enabled(&self) -> bool;
}

#[derive(Debug)]
pub struct AtomicProcessingSwitch {
    enabled: AtomicBool,
}

impl Default for AtomicProcessingSwitch {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AtomicProcessingSwitch {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        tracing::info!("Job processing enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        tracing::warn!("Job processing disabled");
    }
}

impl JobProcessingSwitch for AtomicProcessingSwitch {
    fn is_job_processing_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}
