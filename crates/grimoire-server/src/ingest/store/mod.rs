//! Persistence for sync records
//!
//! [`SyncStore`] separates whole-state writes from counter updates. State fields
//! (statuses, timestamps, file location) are written by the single pipeline task that
//! owns a sync; counters are bumped by concurrent batch workers and must be applied as
//! atomic increments, never read-modify-write.
//!
//! Download-phase transitions race with operator cancels, so they go through
//! [`SyncStore::save_state_if`], which only writes while the stored status is still the
//! one the writer read.

mod memory;
mod postgres;

pub use memory::MemorySyncStore;
pub use postgres::PgSyncStore;

use async_trait::async_trait;
use grimoire_common::SyncType;
use serde::Deserialize;
use uuid::Uuid;

use super::models::{DownloadStatus, FailureEntry, SyncRecord};
use super::Result;

/// Filter for listing sync records, newest first
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncFilter {
    pub sync_type: Option<SyncType>,
    pub status: Option<DownloadStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl SyncFilter {
    fn matches(&self, record: &SyncRecord) -> bool {
        self.sync_type.is_none_or(|t| t == record.sync_type)
            && self.status.is_none_or(|s| s == record.status)
    }
}

#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Persist a new record
    ///
    /// Fails with `AlreadyActive` when the record is active and another active
    /// record exists for the same sync type.
    async fn insert(&self, record: &SyncRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<SyncRecord>>;

    /// Write the state fields of `record`; progress counters are left untouched
    async fn save_state(&self, record: &SyncRecord) -> Result<()>;

    /// Like [`save_state`](Self::save_state), but only while the stored download
    /// status is `expected`
    ///
    /// Returns `false` when another writer changed the status first; nothing is written.
    async fn save_state_if(&self, record: &SyncRecord, expected: DownloadStatus) -> Result<bool>;

    /// Zero the progress counters at the start of a processing pass
    async fn reset_progress(&self, id: Uuid) -> Result<()>;

    /// A batch of `records` was dispatched as `batch_number`
    async fn record_dispatch(&self, id: Uuid, batch_number: i64, records: i64) -> Result<()>;

    /// Workers imported `records` more records
    async fn record_imported(&self, id: Uuid, records: i64) -> Result<()>;

    /// A whole batch failed: bump `failed_batches` and log the failure
    async fn record_batch_failure(&self, id: Uuid, entry: FailureEntry) -> Result<()>;

    async fn append_failure(&self, id: Uuid, entry: FailureEntry) -> Result<()>;

    /// Returns `false` when the record does not exist
    async fn clear_failures(&self, id: Uuid) -> Result<bool>;

    /// Most recently completed download of `sync_type`, other than `exclude`
    async fn latest_completed(
        &self,
        sync_type: SyncType,
        exclude: Option<Uuid>,
    ) -> Result<Option<SyncRecord>>;

    /// The `pending`/`downloading` record of `sync_type`, if any
    async fn find_active(&self, sync_type: SyncType) -> Result<Option<SyncRecord>>;

    /// Page of records plus the total matching `filter`
    async fn list(&self, filter: &SyncFilter) -> Result<(Vec<SyncRecord>, i64)>;

    /// Completed downloads of `sync_type` still holding a local file
    async fn completed_with_files(&self, sync_type: SyncType) -> Result<Vec<SyncRecord>>;

    async fn clear_file_path(&self, id: Uuid) -> Result<()>;

    /// Records a previous process left mid-flight: `pending`/`downloading` downloads
    /// and completed downloads whose processing is `queued`/`processing`
    async fn interrupted(&self) -> Result<Vec<SyncRecord>>;
}
