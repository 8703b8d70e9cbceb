use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::admin::JobProcessingSwitch;
use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::notify::NotificationSink;
use crate::scheduler::{
    CancellationAndRestartCoordinator, ClusterJobClaimCoordinator, JobState, ZombieJobDetector,
};
use crate::store::JobStore;
use crate::stream::StreamFreshnessCache;
use crate::worker::LocalLauncher;

/// One cluster member: every coordinator wired to the shared store.
pub struct Node<S: JobState> {
    pub config: CoordinatorConfig,
    pub launcher: Arc<LocalLauncher<S>>,
    pub claim: Arc<ClusterJobClaimCoordinator<S>>,
    pub cancel: Arc<CancellationAndRestartCoordinator<S>>,
    pub streams: Arc<StreamFreshnessCache<S>>,
    zombies: ZombieJobDetector<S>,
    shutdown: CancellationToken,
}

impl<S: JobState> Node<S> {
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn JobStore<S>>,
        notifications: Arc<dyn NotificationSink>,
        switch: Arc<dyn JobProcessingSwitch>,
        shutdown: CancellationToken,
    ) -> Self {
        let launcher = Arc::new(LocalLauncher::new(
            store.clone(),
            config.executor.clone(),
            config.stream.clone(),
        ));

        let claim = ClusterJobClaimCoordinator::new(
            config.claim.clone(),
            store.clone(),
            launcher.clone(),
            notifications.clone(),
            switch,
        )
        .with_shutdown(shutdown.clone());

        let cancel = CancellationAndRestartCoordinator::new(
            config.cancel.clone(),
            store.clone(),
            launcher.clone(),
            notifications,
        )
        .with_shutdown(shutdown.clone());

        let streams = StreamFreshnessCache::new(config.stream.clone(), store.clone())
            .with_shutdown(shutdown.clone());

        Self {
            config,
            launcher,
            claim: Arc::new(claim),
            cancel: Arc::new(cancel),
            streams: Arc::new(streams),
            zombies: ZombieJobDetector::new(store),
            shutdown,
        }
    }

    /// Run the node until shutdown.
    ///
    /// 1. Reports jobs left running by an earlier process (never changes them)
    /// 2. Runs the claim loop and the cancel sweeper side by side
    ///
    /// # Errors
    ///
    /// Returns an error if the startup zombie scan cannot read the store.
    pub async fn run(&self) -> Result<()> {
        let instance = self.config.instance_id.as_str();
        tracing::info!(instance, flavor = S::FLAVOR, "Starting node");

        let report = self.zombies.detect().await?;
        tracing::debug!(instance, zombies = report.candidates.len(), "Startup check done");

        tokio::join!(self.claim.run(), self.cancel.run());

        let running = self.launcher.running_count().await;
        tracing::info!(instance, running, "Node stopped");
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
