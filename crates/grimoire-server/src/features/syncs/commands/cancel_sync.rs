//! Cancel sync command

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::syncs::types::SyncView;
use crate::ingest::{SyncError, SyncService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSyncCommand {
    pub id: Uuid,
}

impl Request<Result<SyncView, SyncError>> for CancelSyncCommand {}

pub async fn handle(
    service: &SyncService,
    command: CancelSyncCommand,
) -> Result<SyncView, SyncError> {
    service.cancel(command.id).await.map(SyncView::from)
}
