//! Sync pipeline
//!
//! Drives one sync from `pending` to a terminal state:
//!
//! 1. resolve bulk metadata (skipped when the trigger already pinned a version)
//! 2. compare against the latest completed sync of the same type; an unchanged
//!    version fails the sync as redundant without downloading anything
//! 3. download, polling the sync's cancellation token between chunks; a poller also
//!    re-reads the record so a cancel written by another process stops the transfer
//! 4. count records, then stream the file into batches
//! 5. mark processing complete and release files of superseded syncs
//!
//! The processing phase is marked completed once the file has been read to the end,
//! whatever happened to individual batches; `failed_batches` reports those.
//!
//! Every download-phase write is conditional on the status the pipeline last read, so
//! a concurrent cancel either lands before a transition or is rejected after it.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::cancellation::CancellationRegistry;
use super::counter::RecordCounter;
use super::downloader::{BulkDownloader, DownloadProgress, TracingProgress};
use super::jobs::ProcessingSummary;
use super::metadata::BulkMetadataSource;
use super::models::{DownloadStatus, FailureEntry, ProcessingEvent, ProcessingStatus, SyncRecord};
use super::processor::StreamingBatchProcessor;
use super::storage::SyncStorage;
use super::store::SyncStore;
use super::{Result, SyncError};

/// How a pipeline run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// File downloaded and fully streamed into batches
    Completed(ProcessingSummary),
    /// Remote version already ingested; nothing was downloaded
    Redundant { version: String },
    Cancelled,
    Failed { message: String },
    /// The record was not in a state this run could act on
    NotPending { status: DownloadStatus },
}

pub struct SyncPipeline {
    store: Arc<dyn SyncStore>,
    metadata: Arc<dyn BulkMetadataSource>,
    downloader: BulkDownloader,
    storage: SyncStorage,
    counter: RecordCounter,
    processor: StreamingBatchProcessor,
    registry: CancellationRegistry,
    progress: Arc<dyn DownloadProgress>,
    status_poll: Duration,
    claims: ProcessingClaims,
}

const DEFAULT_STATUS_POLL: Duration = Duration::from_secs(5);

impl SyncPipeline {
    pub fn new(
        store: Arc<dyn SyncStore>,
        metadata: Arc<dyn BulkMetadataSource>,
        downloader: BulkDownloader,
        storage: SyncStorage,
        processor: StreamingBatchProcessor,
        registry: CancellationRegistry,
    ) -> Self {
        Self {
            store,
            metadata,
            downloader,
            storage,
            counter: RecordCounter::new(),
            processor,
            registry,
            progress: Arc::new(TracingProgress),
            status_poll: DEFAULT_STATUS_POLL,
            claims: ProcessingClaims::default(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn DownloadProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_status_poll(mut self, interval: Duration) -> Self {
        self.status_poll = interval;
        self
    }

    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    async fn load(&self, sync_id: Uuid) -> Result<SyncRecord> {
        self.store
            .get(sync_id)
            .await?
            .ok_or(SyncError::NotFound(sync_id))
    }

    /// Run the sync `sync_id` end to end
    pub async fn run(&self, sync_id: Uuid) -> Result<SyncOutcome> {
        let outcome = self.download_phase(sync_id).await;
        self.registry.release(sync_id);

        match outcome? {
            Downloaded::Ready => self.process(sync_id).await,
            Downloaded::Stopped(outcome) => Ok(outcome),
        }
    }

    async fn download_phase(&self, sync_id: Uuid) -> Result<Downloaded> {
        let mut record = self.load(sync_id).await?;
        if record.status != DownloadStatus::Pending {
            warn!(%sync_id, status = %record.status, "Sync is not pending, skipping");
            return Ok(Downloaded::Stopped(SyncOutcome::NotPending {
                status: record.status,
            }));
        }

        let token = self.registry.token(sync_id);
        let sync_type = record.sync_type;

        if record.version.is_none() || record.download_uri.is_none() {
            match self.metadata.fetch(sync_type).await {
                Ok(Some(metadata)) => {
                    record.apply_metadata(&metadata);
                    if !self.store.save_state_if(&record, DownloadStatus::Pending).await? {
                        return self.settled(sync_id).await.map(Downloaded::Stopped);
                    }
                },
                Ok(None) => {
                    let message = SyncError::MetadataNotFound(sync_type).to_string();
                    return self.fail(record, message).await.map(Downloaded::Stopped);
                },
                Err(e) => {
                    let message = format!("Failed to fetch bulk metadata: {}", e);
                    return self.fail(record, message).await.map(Downloaded::Stopped);
                },
            }
        }

        let (Some(version), Some(download_uri)) =
            (record.version.clone(), record.download_uri.clone())
        else {
            let message = "Bulk metadata is missing a version or download URI".to_string();
            return self.fail(record, message).await.map(Downloaded::Stopped);
        };

        if let Some(latest) = self.store.latest_completed(sync_type, Some(sync_id)).await? {
            if record.is_redundant_with(&latest) {
                info!(%sync_id, %sync_type, %version, "Remote version already ingested");
                let message =
                    format!("Already have the latest version ({}) of {}", version, sync_type);
                let outcome = match self.fail(record, message).await? {
                    SyncOutcome::Failed { .. } => SyncOutcome::Redundant { version },
                    other => other,
                };
                return Ok(Downloaded::Stopped(outcome));
            }
        }

        if token.is_cancelled() {
            return self.finish_cancelled(sync_id).await.map(Downloaded::Stopped);
        }

        if !record.start() {
            return Ok(Downloaded::Stopped(SyncOutcome::NotPending {
                status: record.status,
            }));
        }
        if !self.store.save_state_if(&record, DownloadStatus::Pending).await? {
            return self.settled(sync_id).await.map(Downloaded::Stopped);
        }

        let dest = match self.storage.destination(sync_type, &download_uri, sync_id).await {
            Ok(dest) => dest,
            Err(e) => {
                let message = format!("Failed to prepare storage: {}", e);
                return self.fail(record, message).await.map(Downloaded::Stopped);
            },
        };

        let watch = self.watch_status(sync_id, token.clone());
        let result = self
            .downloader
            .download(sync_id, &download_uri, &dest, &token, self.progress.as_ref())
            .await;
        drop(watch);

        let downloaded = match result {
            Ok(file) => file,
            Err(e) if e.is_cancelled() => {
                return self.finish_cancelled(sync_id).await.map(Downloaded::Stopped);
            },
            Err(e) => {
                let message = format!("Download failed: {}", e);
                return self.fail(record, message).await.map(Downloaded::Stopped);
            },
        };
        self.registry.release(sync_id);

        record.complete(downloaded.path.to_string_lossy(), downloaded.bytes as i64)?;
        record.queue_processing()?;
        if !self.store.save_state_if(&record, DownloadStatus::Downloading).await? {
            // Cancelled by another actor after the last chunk was written
            self.storage.remove(&downloaded.path).await?;
            info!(%sync_id, "Sync left downloading during transfer, file discarded");
            return self.settled(sync_id).await.map(Downloaded::Stopped);
        }

        info!(
            %sync_id,
            %sync_type,
            %version,
            bytes = downloaded.bytes,
            "Download completed, processing queued"
        );
        Ok(Downloaded::Ready)
    }

    /// Cancel `token` once the stored record stops being `downloading`
    ///
    /// Catches cancels written by another process, which has no handle on this
    /// process's tokens.
    fn watch_status(&self, sync_id: Uuid, token: CancellationToken) -> StatusWatch {
        let store = self.store.clone();
        let poll = self.status_poll;

        StatusWatch(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(poll) => {},
                }

                match store.get(sync_id).await {
                    Ok(Some(record)) if record.status == DownloadStatus::Downloading => {},
                    Ok(record) => {
                        info!(
                            %sync_id,
                            status = ?record.map(|r| r.status),
                            "Sync no longer downloading, stopping transfer"
                        );
                        token.cancel();
                        return;
                    },
                    Err(e) => warn!(%sync_id, error = %e, "Failed to poll sync status"),
                }
            }
        }))
    }

    /// True while this process is running the processing phase of `sync_id`
    pub fn is_processing(&self, sync_id: Uuid) -> bool {
        self.claims.contains(sync_id)
    }

    /// Run the processing phase of a `queued` sync
    ///
    /// Fails with [`SyncError::ProcessingInProgress`] when this process is already
    /// processing the sync.
    pub async fn process(&self, sync_id: Uuid) -> Result<SyncOutcome> {
        let Some(_claim) = self.claims.claim(sync_id) else {
            return Err(SyncError::ProcessingInProgress(sync_id));
        };

        let mut record = self.load(sync_id).await?;
        ProcessingStatus::transition(record.processing_status, ProcessingEvent::Start)?;

        match self.stream(&mut record).await {
            Ok(summary) => {
                record.complete_processing()?;
                self.store.save_state(&record).await?;
                info!(
                    %sync_id,
                    sync_type = %record.sync_type,
                    batches = summary.batches_dispatched,
                    records = summary.records_dispatched,
                    skipped = summary.records_skipped,
                    "Processing completed"
                );

                if let Some(path) = record.file_path.as_deref() {
                    if let Err(e) = self
                        .storage
                        .cleanup_superseded(self.store.as_ref(), record.sync_type, Path::new(path))
                        .await
                    {
                        warn!(%sync_id, error = %e, "Failed to clean up superseded files");
                    }
                }

                Ok(SyncOutcome::Completed(summary))
            },
            Err(e) => {
                let message = e.to_string();
                error!(
                    %sync_id,
                    sync_type = %record.sync_type,
                    error = %message,
                    "Processing failed"
                );

                record.fail_processing()?;
                self.store.save_state(&record).await?;
                self.store
                    .append_failure(
                        sync_id,
                        FailureEntry::new(message.clone(), None, json!({ "phase": "processing" })),
                    )
                    .await?;

                Ok(SyncOutcome::Failed { message })
            },
        }
    }

    async fn stream(&self, record: &mut SyncRecord) -> Result<ProcessingSummary> {
        let path = record
            .file_path
            .clone()
            .ok_or_else(|| SyncError::Validation("sync has no downloaded file".to_string()))?;
        let path = Path::new(&path);

        let total = self.counter.count_file(path).await?;
        record.start_processing(total, self.processor.batch_size() as i64)?;
        self.store.reset_progress(record.id).await?;
        self.store.save_state(record).await?;

        self.processor
            .process_file(record.id, record.sync_type, path)
            .await
    }

    /// Fail the download phase unless another actor moved the record first
    async fn fail(&self, mut record: SyncRecord, message: String) -> Result<SyncOutcome> {
        let expected = record.status;
        record.fail(message.clone())?;
        if !self.store.save_state_if(&record, expected).await? {
            return self.settled(record.id).await;
        }

        warn!(
            sync_id = %record.id,
            sync_type = %record.sync_type,
            error = %message,
            "Sync failed"
        );
        Ok(SyncOutcome::Failed { message })
    }

    /// Settle a sync whose download was cancelled; never records an error
    ///
    /// A sync cancelled elsewhere while its transfer was still running gets its
    /// `cancelled_at` stamped here, since this is where the transfer stopped.
    async fn finish_cancelled(&self, sync_id: Uuid) -> Result<SyncOutcome> {
        let status = loop {
            let mut record = self.load(sync_id).await?;
            let expected = record.status;
            let changed = if record.is_active() {
                record.cancel(true)?;
                true
            } else {
                record.note_work_removed()
            };

            if !changed || self.store.save_state_if(&record, expected).await? {
                break record.status;
            }
        };

        info!(%sync_id, %status, "Sync cancelled");
        Ok(outcome_for(status))
    }

    /// Outcome of a run that lost a state write to another actor
    async fn settled(&self, sync_id: Uuid) -> Result<SyncOutcome> {
        let record = self.load(sync_id).await?;
        info!(%sync_id, status = %record.status, "Sync changed state concurrently");
        Ok(outcome_for(record.status))
    }
}

fn outcome_for(status: DownloadStatus) -> SyncOutcome {
    match status {
        DownloadStatus::Cancelled => SyncOutcome::Cancelled,
        status => SyncOutcome::NotPending { status },
    }
}

enum Downloaded {
    Ready,
    Stopped(SyncOutcome),
}

/// Aborts the status poller when the transfer is over
struct StatusWatch(JoinHandle<()>);

impl Drop for StatusWatch {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Syncs whose processing phase runs in this process
#[derive(Default)]
struct ProcessingClaims {
    ids: Mutex<HashSet<Uuid>>,
}

impl ProcessingClaims {
    fn lock(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn claim(&self, sync_id: Uuid) -> Option<ProcessingClaim<'_>> {
        let claimed = self.lock().insert(sync_id);
        claimed.then(|| ProcessingClaim {
            claims: self,
            sync_id,
        })
    }

    fn contains(&self, sync_id: Uuid) -> bool {
        self.lock().contains(&sync_id)
    }
}

struct ProcessingClaim<'a> {
    claims: &'a ProcessingClaims,
    sync_id: Uuid,
}

impl Drop for ProcessingClaim<'_> {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.sync_id);
    }
}
