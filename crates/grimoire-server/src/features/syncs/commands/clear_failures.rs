//! Clear failures command

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::syncs::types::SyncView;
use crate::ingest::{SyncError, SyncService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearFailuresCommand {
    pub id: Uuid,
}

impl Request<Result<SyncView, SyncError>> for ClearFailuresCommand {}

pub async fn handle(
    service: &SyncService,
    command: ClearFailuresCommand,
) -> Result<SyncView, SyncError> {
    service.clear_failures(command.id).await.map(SyncView::from)
}
