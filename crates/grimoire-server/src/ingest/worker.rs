//! Batch import worker
//!
//! Failure handling has two tiers:
//!
//! - a record the mapper rejects is logged and skipped; the rest of the batch still
//!   imports and the batch succeeds
//! - an error outside the per-record loop fails the batch: `failed_batches` is
//!   incremented, the failure is logged on the sync, and the error is returned so the
//!   job runner can retry the whole batch

use std::sync::Arc;

use grimoire_common::types::RecordKind;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::jobs::{record_id, BatchImportJob, BatchReport, RecordFailure};
use super::mapper::RecordMapper;
use super::models::FailureEntry;
use super::store::SyncStore;
use super::{Result, SyncError};

#[derive(Clone)]
pub struct BatchImportWorker {
    store: Arc<dyn SyncStore>,
    mapper: Arc<dyn RecordMapper>,
}

impl BatchImportWorker {
    pub fn new(store: Arc<dyn SyncStore>, mapper: Arc<dyn RecordMapper>) -> Self {
        Self { store, mapper }
    }

    /// Import one batch
    pub async fn handle(&self, job: &BatchImportJob) -> Result<BatchReport> {
        match self.import(job).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(
                    sync_id = %job.sync_id,
                    sync_type = %job.sync_type,
                    batch_number = job.batch_number,
                    error = %e,
                    "Batch import failed"
                );

                let entry = FailureEntry::new(
                    e.to_string(),
                    Some(job.batch_number),
                    json!({ "records": job.len(), "sync_type": job.sync_type }),
                );
                if let Err(store_err) = self.store.record_batch_failure(job.sync_id, entry).await {
                    error!(
                        sync_id = %job.sync_id,
                        batch_number = job.batch_number,
                        error = %store_err,
                        "Failed to record batch failure"
                    );
                }

                Err(e)
            },
        }
    }

    async fn import(&self, job: &BatchImportJob) -> Result<BatchReport> {
        self.mapper
            .prepare()
            .await
            .map_err(|e| SyncError::Import(format!("{:#}", e)))?;

        let kind = job.sync_type.record_kind();
        let mut report = BatchReport {
            batch_number: job.batch_number,
            attempted: job.records.len(),
            ..Default::default()
        };

        for (index, record) in job.records.iter().enumerate() {
            let result = match kind {
                RecordKind::OracleCard => self.mapper.import_oracle_card(record).await,
                RecordKind::CardPrinting => self.mapper.import_card_printing(record).await,
                RecordKind::Ruling => self.mapper.import_ruling(record).await,
            };

            match result {
                Ok(()) => report.imported += 1,
                Err(e) => {
                    let record_id = record_id(record);
                    warn!(
                        sync_id = %job.sync_id,
                        sync_type = %job.sync_type,
                        batch_number = job.batch_number,
                        record_id = record_id.as_deref().unwrap_or("unknown"),
                        index,
                        error = %format!("{:#}", e),
                        "Failed to import record"
                    );
                    report.failures.push(RecordFailure {
                        index,
                        record_id,
                        error: format!("{:#}", e),
                    });
                },
            }
        }

        if report.imported > 0 {
            self.store
                .record_imported(job.sync_id, report.imported as i64)
                .await?;
        }

        if report.failures.is_empty() {
            debug!(
                sync_id = %job.sync_id,
                batch_number = job.batch_number,
                imported = report.imported,
                "Batch imported"
            );
        } else {
            info!(
                sync_id = %job.sync_id,
                batch_number = job.batch_number,
                imported = report.imported,
                failed = report.failures.len(),
                "Batch imported with record failures"
            );
        }

        Ok(report)
    }
}
