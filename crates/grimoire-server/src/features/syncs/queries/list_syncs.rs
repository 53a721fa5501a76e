//! List syncs query
//!
//! Newest first, optionally filtered by sync type and download status.

use grimoire_common::SyncType;
use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::features::shared::{Paginated, PaginationParams};
use crate::features::syncs::types::SyncView;
use crate::ingest::{DownloadStatus, SyncError, SyncFilter, SyncService};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSyncsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<i64>,
}

pub type ListSyncsResponse = Paginated<SyncView>;

impl Request<Result<ListSyncsResponse, SyncError>> for ListSyncsQuery {}

impl ListSyncsQuery {
    fn pagination(&self) -> PaginationParams {
        PaginationParams::new(self.page, self.per_page)
    }

    /// Parse and validate the filters
    pub fn to_filter(&self) -> Result<SyncFilter, SyncError> {
        let pagination = self.pagination();
        pagination
            .validate()
            .map_err(|e| SyncError::Validation(e.to_string()))?;

        let sync_type = self
            .sync_type
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<SyncType>)
            .transpose()?;
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().parse::<DownloadStatus>())
            .transpose()
            .map_err(SyncError::Validation)?;

        Ok(SyncFilter {
            sync_type,
            status,
            limit: pagination.per_page(),
            offset: pagination.offset(),
        })
    }
}

pub async fn handle(
    service: &SyncService,
    query: ListSyncsQuery,
) -> Result<ListSyncsResponse, SyncError> {
    let filter = query.to_filter()?;
    let (records, total) = service.list(&filter).await?;

    Ok(Paginated::from_items(records, &query.pagination(), total).map(SyncView::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_filter_parses_values() {
        let query = ListSyncsQuery {
            sync_type: Some("default-cards".to_string()),
            status: Some("failed".to_string()),
            page: Some(2),
            per_page: Some(10),
        };

        let filter = query.to_filter().unwrap();
        assert_eq!(filter.sync_type, Some(SyncType::DefaultCards));
        assert_eq!(filter.status, Some(DownloadStatus::Failed));
        assert_eq!(filter.limit, 10);
        assert_eq!(filter.offset, 10);
    }

    #[test]
    fn test_to_filter_rejects_unknown_values() {
        let bad_type = ListSyncsQuery {
            sync_type: Some("tokens".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad_type.to_filter(), Err(SyncError::Common(_))));

        let bad_status = ListSyncsQuery {
            status: Some("paused".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad_status.to_filter(), Err(SyncError::Validation(_))));

        let bad_page = ListSyncsQuery {
            page: Some(0),
            ..Default::default()
        };
        assert!(matches!(bad_page.to_filter(), Err(SyncError::Validation(_))));
    }
}
