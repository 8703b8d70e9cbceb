use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::job::JobState;
use crate::store::JobStore;

pub const NO_ZOMBIES_REPORT: &str = "OK: no zombie jobs found";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZombieCandidate {
    pub job_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub state: String,
}

/// Running jobs found at startup that nobody on this instance owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ZombieReport {
    pub candidates: Vec<ZombieCandidate>,
}

impl ZombieReport {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn to_report_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ZombieReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.candidates.is_empty() {
            return write!(f, "{}", NO_ZOMBIES_REPORT);
        }

        writeln!(f, "WARNING: {} potential zombie job(s) found:", self.candidates.len())?;
        for c in &self.candidates {
            let started = c
                .started_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            writeln!(f, "- job {} started at {} in state {}", c.job_id, started, c.state)?;
        }
        write!(
            f,
            "These jobs may still be executed by another live instance. \
             Check them manually before taking any corrective action."
        )
    }
}

/// Startup check for jobs left running by a previous process.
///
/// Only reports. A running job may belong to a live peer, and nothing in the
/// store tells the two cases apart.
pub struct ZombieJobDetector<S: JobState> {
    store: Arc<dyn JobStore<S>>,
}

impl<S: JobState> ZombieJobDetector<S> {
    pub fn new(store: Arc<dyn JobStore<S>>) -> Self {
        Self { store }
    }

    pub async fn detect(&self) -> Result<ZombieReport> {
        let now = Utc::now();
        let candidates = self
            .store
            .find_in_state(S::running())
            .await?
            .into_iter()
            .filter(|job| job.started_at.is_some_and(|started| started < now))
            .map(|job| ZombieCandidate {
                job_id: job.id,
                started_at: job.started_at,
                state: job.execution_state.to_string(),
            })
            .collect();

        let report = ZombieReport { candidates };
        if report.is_empty() {
            tracing::info!("{}", report);
        } else {
            tracing::warn!(count = report.candidates.len(), "{}", report);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_text() {
        assert_eq!(ZombieReport::default().to_report_string(), NO_ZOMBIES_REPORT);
    }

    #[test]
    fn report_lists_every_candidate_with_caveat() {
        let id = Uuid::new_v4();
        let report = ZombieReport {
            candidates: vec![ZombieCandidate {
                job_id: id,
                started_at: None,
                state: "STARTED".to_string(),
            }],
        };
        let text = report.to_report_string();
        assert!(text.contains(&id.to_string()));
        assert!(text.contains("STARTED"));
        assert!(text.contains("Check them manually"));
    }
}
