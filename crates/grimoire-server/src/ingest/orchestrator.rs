//! Automatic sync orchestrator
//!
//! Periodically triggers every enabled sync type. Types that already have an active
//! sync are skipped; an unchanged remote version is detected by the pipeline, which
//! fails the new sync as redundant.

use std::time::Duration;

use grimoire_common::SyncType;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::service::SyncService;
use super::SyncError;

const INITIAL_DELAY: Duration = Duration::from_secs(5);

pub struct SyncOrchestrator {
    service: SyncService,
    sync_types: Vec<SyncType>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl SyncOrchestrator {
    pub fn new(service: SyncService, sync_types: Vec<SyncType>, interval: Duration) -> Self {
        Self {
            service,
            sync_types,
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the orchestrator loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the orchestrator in background
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                types = ?self.sync_types,
                interval_secs = self.interval.as_secs(),
                "Sync orchestrator started"
            );

            // Let the server come up first
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(INITIAL_DELAY) => {},
            }

            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let triggered = self.run_cycle().await;
                        info!(triggered, "Sync cycle finished");
                    },
                }
            }

            info!("Sync orchestrator stopped");
        })
    }

    /// Trigger every enabled sync type once; returns how many syncs were started
    pub async fn run_cycle(&self) -> usize {
        let mut triggered = 0;

        for &sync_type in &self.sync_types {
            match self.service.trigger(sync_type).await {
                Ok(record) => {
                    info!(sync_id = %record.id, %sync_type, "Scheduled sync triggered");
                    triggered += 1;
                },
                Err(SyncError::AlreadyActive(_)) => {
                    warn!(%sync_type, "Sync already in progress, skipping");
                },
                Err(e) => {
                    error!(%sync_type, error = %e, "Failed to trigger scheduled sync");
                },
            }
        }

        triggered
    }
}
