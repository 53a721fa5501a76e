//! Job payloads and reports for batch imports

use grimoire_common::SyncType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One batch of records dispatched for import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchImportJob {
    pub sync_id: Uuid,
    pub sync_type: SyncType,
    /// 1-based, gapless within one processing pass
    pub batch_number: i64,
    pub records: Vec<serde_json::Value>,
}

impl BatchImportJob {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A record the mapper rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// Position of the record within its batch
    pub index: usize,
    pub record_id: Option<String>,
    pub error: String,
}

/// Outcome of one batch whose import loop ran to the end
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_number: i64,
    pub attempted: usize,
    pub imported: usize,
    pub failures: Vec<RecordFailure>,
}

/// Totals of one streaming pass over a bulk file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub batches_dispatched: i64,
    pub records_dispatched: i64,
    pub records_skipped: i64,
}

/// Natural identifier of a raw record, for log lines
pub fn record_id(record: &serde_json::Value) -> Option<String> {
    ["id", "oracle_id"]
        .iter()
        .find_map(|key| record.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}
