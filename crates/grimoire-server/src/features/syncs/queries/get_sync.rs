//! Get sync query

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::syncs::types::SyncView;
use crate::ingest::{SyncError, SyncService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSyncQuery {
    pub id: Uuid,
}

impl Request<Result<SyncView, SyncError>> for GetSyncQuery {}

pub async fn handle(service: &SyncService, query: GetSyncQuery) -> Result<SyncView, SyncError> {
    service.get(query.id).await.map(SyncView::from)
}
