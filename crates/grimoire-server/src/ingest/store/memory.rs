//! In-process sync store for tests and dry runs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use grimoire_common::SyncType;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{SyncFilter, SyncStore};
use crate::ingest::models::{DownloadStatus, FailureEntry, SyncRecord};
use crate::ingest::{Result, SyncError};

#[derive(Clone, Default)]
pub struct MemorySyncStore {
    records: Arc<RwLock<HashMap<Uuid, SyncRecord>>>,
}

impl MemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut SyncRecord) + Send,
    {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(SyncError::NotFound(id))?;
        f(record);
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl SyncStore for MemorySyncStore {
    async fn insert(&self, record: &SyncRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if record.is_active()
            && records
                .values()
                .any(|r| r.sync_type == record.sync_type && r.is_active() && r.id != record.id)
        {
            return Err(SyncError::AlreadyActive(record.sync_type));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SyncRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn save_state(&self, record: &SyncRecord) -> Result<()> {
        let state = record.clone();
        self.update(record.id, move |stored| apply_state(stored, state))
            .await
    }

    async fn save_state_if(&self, record: &SyncRecord, expected: DownloadStatus) -> Result<bool> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&record.id)
            .ok_or(SyncError::NotFound(record.id))?;
        if stored.status != expected {
            return Ok(false);
        }
        apply_state(stored, record.clone());
        stored.updated_at = Utc::now();
        Ok(true)
    }

    async fn reset_progress(&self, id: Uuid) -> Result<()> {
        self.update(id, |r| {
            r.processed_records = 0;
            r.imported_records = 0;
            r.last_processed_batch = 0;
            r.failed_batches = 0;
        })
        .await
    }

    async fn record_dispatch(&self, id: Uuid, batch_number: i64, records: i64) -> Result<()> {
        self.update(id, |r| {
            r.processed_records += records;
            r.last_processed_batch = r.last_processed_batch.max(batch_number);
        })
        .await
    }

    async fn record_imported(&self, id: Uuid, records: i64) -> Result<()> {
        self.update(id, |r| r.imported_records += records).await
    }

    async fn record_batch_failure(&self, id: Uuid, entry: FailureEntry) -> Result<()> {
        self.update(id, |r| {
            r.failed_batches += 1;
            r.failure_log.push(entry);
        })
        .await
    }

    async fn append_failure(&self, id: Uuid, entry: FailureEntry) -> Result<()> {
        self.update(id, |r| r.failure_log.push(entry)).await
    }

    async fn clear_failures(&self, id: Uuid) -> Result<bool> {
        match self.update(id, |r| r.failure_log.clear()).await {
            Ok(()) => Ok(true),
            Err(SyncError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn latest_completed(
        &self,
        sync_type: SyncType,
        exclude: Option<Uuid>,
    ) -> Result<Option<SyncRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| {
                r.sync_type == sync_type
                    && r.status == DownloadStatus::Completed
                    && Some(r.id) != exclude
            })
            .max_by_key(|r| (r.completed_at, r.created_at))
            .cloned())
    }

    async fn find_active(&self, sync_type: SyncType) -> Result<Option<SyncRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.sync_type == sync_type && r.is_active())
            .cloned())
    }

    async fn list(&self, filter: &SyncFilter) -> Result<(Vec<SyncRecord>, i64)> {
        let records = self.records.read().await;
        let mut matching: Vec<SyncRecord> =
            records.values().filter(|r| filter.matches(r)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn completed_with_files(&self, sync_type: SyncType) -> Result<Vec<SyncRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| {
                r.sync_type == sync_type
                    && r.status == DownloadStatus::Completed
                    && r.file_path.is_some()
            })
            .cloned()
            .collect())
    }

    async fn clear_file_path(&self, id: Uuid) -> Result<()> {
        self.update(id, |r| r.file_path = None).await
    }

    async fn interrupted(&self) -> Result<Vec<SyncRecord>> {
        let records = self.records.read().await;
        let mut stale: Vec<SyncRecord> = records
            .values()
            .filter(|r| r.is_active() || r.processing_in_flight())
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.created_at);
        Ok(stale)
    }
}

/// Copy the state fields of `state` over `stored`, leaving counters alone
fn apply_state(stored: &mut SyncRecord, state: SyncRecord) {
    stored.status = state.status;
    stored.version = state.version;
    stored.download_uri = state.download_uri;
    stored.file_path = state.file_path;
    stored.file_size = state.file_size;
    stored.started_at = state.started_at;
    stored.completed_at = state.completed_at;
    stored.cancelled_at = state.cancelled_at;
    stored.error_message = state.error_message;
    stored.processing_status = state.processing_status;
    stored.total_records = state.total_records;
    stored.batch_size = state.batch_size;
    stored.processing_started_at = state.processing_started_at;
    stored.processing_completed_at = state.processing_completed_at;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::models::ProcessingStatus;

    #[tokio::test]
    async fn test_insert_rejects_second_active_record() {
        let store = MemorySyncStore::new();
        store.insert(&SyncRecord::new(SyncType::OracleCards)).await.unwrap();

        let err = store
            .insert(&SyncRecord::new(SyncType::OracleCards))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadyActive(SyncType::OracleCards)));

        store.insert(&SyncRecord::new(SyncType::Rulings)).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_state_keeps_counters() {
        let store = MemorySyncStore::new();
        let mut record = SyncRecord::new(SyncType::Rulings);
        store.insert(&record).await.unwrap();
        store.record_dispatch(record.id, 1, 10).await.unwrap();

        record.start();
        store.save_state(&record).await.unwrap();

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DownloadStatus::Downloading);
        assert_eq!(stored.processed_records, 10);
        assert_eq!(stored.last_processed_batch, 1);
    }

    #[tokio::test]
    async fn test_stale_cancel_cannot_overwrite_completed_download() {
        let store = MemorySyncStore::new();
        let mut record = SyncRecord::new(SyncType::Rulings);
        record.start();
        store.insert(&record).await.unwrap();

        // Cancel reads the record while it is still downloading
        let mut stale = store.get(record.id).await.unwrap().unwrap();

        record.complete("storage/scryfall/rulings/rulings.json", 10).unwrap();
        record.queue_processing().unwrap();
        assert!(store
            .save_state_if(&record, DownloadStatus::Downloading)
            .await
            .unwrap());

        stale.cancel(false).unwrap();
        assert!(!store
            .save_state_if(&stale, DownloadStatus::Downloading)
            .await
            .unwrap());

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DownloadStatus::Completed);
        assert_eq!(stored.processing_status, Some(ProcessingStatus::Queued));
        assert!(stored.file_path.is_some());
    }

    #[tokio::test]
    async fn test_interrupted_lists_in_flight_records() {
        let store = MemorySyncStore::new();

        let pending = SyncRecord::new(SyncType::Rulings);
        store.insert(&pending).await.unwrap();

        let mut queued = SyncRecord::new(SyncType::OracleCards);
        queued.start();
        queued.complete("oracle.json", 1).unwrap();
        queued.queue_processing().unwrap();
        store.insert(&queued).await.unwrap();

        let mut done = SyncRecord::new(SyncType::AllCards);
        done.start();
        done.complete("all.json", 1).unwrap();
        store.insert(&done).await.unwrap();

        let mut failed = SyncRecord::new(SyncType::DefaultCards);
        failed.fail("boom").unwrap();
        store.insert(&failed).await.unwrap();

        let ids: Vec<Uuid> = store.interrupted().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&pending.id));
        assert!(ids.contains(&queued.id));
    }

    #[tokio::test]
    async fn test_out_of_order_dispatch_keeps_highest_batch() {
        let store = MemorySyncStore::new();
        let record = SyncRecord::new(SyncType::Rulings);
        store.insert(&record).await.unwrap();

        store.record_dispatch(record.id, 2, 5).await.unwrap();
        store.record_dispatch(record.id, 1, 5).await.unwrap();

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.last_processed_batch, 2);
        assert_eq!(stored.processed_records, 10);
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let store = MemorySyncStore::new();
        for sync_type in SyncType::ALL {
            let mut record = SyncRecord::new(sync_type);
            record.fail("boom").unwrap();
            store.insert(&record).await.unwrap();
        }

        let filter = SyncFilter {
            sync_type: Some(SyncType::Rulings),
            limit: 10,
            ..Default::default()
        };
        let (page, total) = store.list(&filter).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].sync_type, SyncType::Rulings);

        let filter = SyncFilter {
            limit: 2,
            offset: 4,
            ..Default::default()
        };
        let (page, total) = store.list(&filter).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_failures_unknown_record() {
        let store = MemorySyncStore::new();
        assert!(!store.clear_failures(Uuid::new_v4()).await.unwrap());
    }
}
