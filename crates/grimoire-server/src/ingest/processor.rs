//! Streaming batch processor
//!
//! One sequential pass over a downloaded file. Well-formed records accumulate into
//! batches of at most `batch_size`; each full batch (and the final partial one) gets
//! the next batch number, is dispatched, and is immediately counted in
//! `processed_records` / `last_processed_batch`. Progress therefore measures records
//! read and queued, not records imported; `imported_records` tracks the latter.

use std::path::Path;
use std::sync::Arc;

use grimoire_common::SyncType;
use tokio::io::AsyncBufRead;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatcher::BatchDispatcher;
use super::jobs::{BatchImportJob, ProcessingSummary};
use super::scanner::{parse_record, preview, ElementScanner};
use super::store::SyncStore;
use super::Result;

pub struct StreamingBatchProcessor {
    store: Arc<dyn SyncStore>,
    dispatcher: Arc<dyn BatchDispatcher>,
    batch_size: usize,
}

impl StreamingBatchProcessor {
    pub fn new(
        store: Arc<dyn SyncStore>,
        dispatcher: Arc<dyn BatchDispatcher>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn process_file(
        &self,
        sync_id: Uuid,
        sync_type: SyncType,
        path: &Path,
    ) -> Result<ProcessingSummary> {
        let scanner = ElementScanner::open(path).await?;
        self.process(sync_id, sync_type, scanner).await
    }

    pub async fn process<R: AsyncBufRead + Unpin>(
        &self,
        sync_id: Uuid,
        sync_type: SyncType,
        mut scanner: ElementScanner<R>,
    ) -> Result<ProcessingSummary> {
        let mut summary = ProcessingSummary::default();
        let mut batch = Vec::with_capacity(self.batch_size);

        while let Some(element) = scanner.next_element().await? {
            match parse_record(&element) {
                Ok(record) => batch.push(record),
                Err(e) => {
                    summary.records_skipped += 1;
                    warn!(
                        %sync_id,
                        %sync_type,
                        error = %e,
                        element = %preview(&element),
                        "Skipping malformed record"
                    );
                    continue;
                },
            }

            if batch.len() >= self.batch_size {
                let records = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                self.flush(sync_id, sync_type, records, &mut summary).await?;
            }
        }

        if !batch.is_empty() {
            self.flush(sync_id, sync_type, batch, &mut summary).await?;
        }

        info!(
            %sync_id,
            %sync_type,
            batches = summary.batches_dispatched,
            records = summary.records_dispatched,
            skipped = summary.records_skipped,
            "Finished streaming pass"
        );

        Ok(summary)
    }

    async fn flush(
        &self,
        sync_id: Uuid,
        sync_type: SyncType,
        records: Vec<serde_json::Value>,
        summary: &mut ProcessingSummary,
    ) -> Result<()> {
        let batch_number = summary.batches_dispatched + 1;
        let count = records.len() as i64;

        self.dispatcher
            .dispatch(BatchImportJob {
                sync_id,
                sync_type,
                batch_number,
                records,
            })
            .await?;
        self.store.record_dispatch(sync_id, batch_number, count).await?;

        summary.batches_dispatched = batch_number;
        summary.records_dispatched += count;
        debug!(%sync_id, batch_number, records = count, "Dispatched batch");

        Ok(())
    }
}
