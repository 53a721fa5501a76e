//! Restart processing command
//!
//! Re-queues the processing phase of a downloaded sync; progress counters start over.
//! A phase stuck `queued`/`processing` after its process died is recovered the same way.

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::syncs::types::SyncView;
use crate::ingest::{SyncError, SyncService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartProcessingCommand {
    pub id: Uuid,
}

impl Request<Result<SyncView, SyncError>> for RestartProcessingCommand {}

pub async fn handle(
    service: &SyncService,
    command: RestartProcessingCommand,
) -> Result<SyncView, SyncError> {
    service.restart_processing(command.id).await.map(SyncView::from)
}
