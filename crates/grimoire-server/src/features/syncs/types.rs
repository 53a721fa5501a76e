//! Response types shared by sync queries and commands

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::SyncRecord;

/// A sync record plus its derived progress fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncView {
    #[serde(flatten)]
    pub record: SyncRecord,
    pub progress_percentage: f64,
    /// `null` while the projection is unknown
    pub estimated_completion_time: Option<DateTime<Utc>>,
}

impl From<SyncRecord> for SyncView {
    fn from(record: SyncRecord) -> Self {
        Self {
            progress_percentage: record.processing_progress_percentage(),
            estimated_completion_time: record.estimated_completion_time(),
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grimoire_common::SyncType;

    #[test]
    fn test_view_flattens_record_fields() {
        let record = SyncRecord::new(SyncType::OracleCards);
        let value = serde_json::to_value(SyncView::from(record)).unwrap();

        assert_eq!(value["sync_type"], "oracle_cards");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["progress_percentage"], 0.0);
        assert!(value["estimated_completion_time"].is_null());
        assert!(value["failure_log"].as_array().unwrap().is_empty());
    }
}
