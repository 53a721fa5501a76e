//! Trigger sync command
//!
//! Creates a `pending` sync and starts it in the background. Rejected while another
//! sync of the same type is pending or downloading.

use grimoire_common::SyncType;
use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::features::syncs::types::SyncView;
use crate::ingest::{SyncError, SyncService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSyncCommand {
    pub sync_type: String,
}

impl Request<Result<SyncView, SyncError>> for TriggerSyncCommand {}

impl TriggerSyncCommand {
    pub fn validate(&self) -> Result<SyncType, SyncError> {
        if self.sync_type.trim().is_empty() {
            return Err(SyncError::Validation("sync_type is required".to_string()));
        }
        Ok(self.sync_type.parse()?)
    }
}

pub async fn handle(
    service: &SyncService,
    command: TriggerSyncCommand,
) -> Result<SyncView, SyncError> {
    let sync_type = command.validate()?;
    service.trigger(sync_type).await.map(SyncView::from)
}
