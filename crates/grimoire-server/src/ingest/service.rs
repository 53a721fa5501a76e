//! Caller-facing sync operations
//!
//! [`SyncService`] is what the HTTP surface, the orchestrator and the CLI talk to.
//! It owns the caller-level guard (one `pending`/`downloading` sync per type) and
//! hands accepted syncs to the pipeline on background tasks.

use std::sync::Arc;

use grimoire_common::SyncType;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cancellation::CancellationRegistry;
use super::config::SyncConfig;
use super::dispatcher::TaskDispatcher;
use super::downloader::BulkDownloader;
use super::mapper::RecordMapper;
use super::metadata::{http_client, BulkMetadataSource, CatalogClient};
use super::models::{DownloadStatus, SyncRecord};
use super::pipeline::{SyncOutcome, SyncPipeline};
use super::processor::StreamingBatchProcessor;
use super::storage::SyncStorage;
use super::store::{SyncFilter, SyncStore};
use super::worker::BatchImportWorker;
use super::{Result, SyncError};

const INTERRUPTED_MESSAGE: &str = "Interrupted by server restart";

#[derive(Clone)]
pub struct SyncService {
    pipeline: Arc<SyncPipeline>,
    store: Arc<dyn SyncStore>,
    registry: CancellationRegistry,
}

impl SyncService {
    pub fn new(pipeline: Arc<SyncPipeline>) -> Self {
        let store = pipeline.store().clone();
        let registry = pipeline.registry().clone();
        Self {
            pipeline,
            store,
            registry,
        }
    }

    /// Wire the production pipeline from configuration
    ///
    /// The dispatcher is returned alongside so callers can wait for outstanding
    /// batch imports.
    pub fn from_config(
        config: &SyncConfig,
        store: Arc<dyn SyncStore>,
        mapper: Arc<dyn RecordMapper>,
    ) -> Result<(Self, Arc<TaskDispatcher>)> {
        let client = http_client(config)?;
        let metadata: Arc<dyn BulkMetadataSource> = Arc::new(
            CatalogClient::new(client.clone(), config.catalog_url.clone())
                .with_request_timeout(config.http_timeout()),
        );

        let worker = BatchImportWorker::new(store.clone(), mapper);
        let dispatcher = Arc::new(
            TaskDispatcher::new(
                worker,
                config.max_concurrent_batches,
                config.max_attempts,
                config.retry_backoff(),
            )
            .with_queue_limit(config.max_queued_batches),
        );
        let processor =
            StreamingBatchProcessor::new(store.clone(), dispatcher.clone(), config.batch_size);

        let pipeline = SyncPipeline::new(
            store,
            metadata,
            BulkDownloader::new(client, config.chunk_size),
            SyncStorage::new(config.storage_root.clone(), config.provider.clone()),
            processor,
            CancellationRegistry::new(),
        )
        .with_status_poll(config.status_poll());

        Ok((Self::new(Arc::new(pipeline)), dispatcher))
    }

    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    pub async fn get(&self, id: Uuid) -> Result<SyncRecord> {
        self.store.get(id).await?.ok_or(SyncError::NotFound(id))
    }

    pub async fn list(&self, filter: &SyncFilter) -> Result<(Vec<SyncRecord>, i64)> {
        self.store.list(filter).await
    }

    /// Create a `pending` sync, enforcing one active sync per type
    pub async fn create(&self, sync_type: SyncType) -> Result<SyncRecord> {
        if self.store.find_active(sync_type).await?.is_some() {
            return Err(SyncError::AlreadyActive(sync_type));
        }

        let record = SyncRecord::new(sync_type);
        self.store.insert(&record).await?;
        self.registry.register(record.id);

        info!(sync_id = %record.id, %sync_type, "Sync created");
        Ok(record)
    }

    /// Create a sync and run it in the background
    pub async fn trigger(&self, sync_type: SyncType) -> Result<SyncRecord> {
        let record = self.create(sync_type).await?;
        self.spawn_run(record.id);
        Ok(record)
    }

    fn spawn_run(&self, sync_id: Uuid) {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            match pipeline.run(sync_id).await {
                Ok(outcome) => info!(%sync_id, ?outcome, "Sync run finished"),
                Err(e) => error!(%sync_id, error = %e, "Sync run aborted"),
            }
        });
    }

    fn spawn_process(&self, sync_id: Uuid) {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            match pipeline.process(sync_id).await {
                Ok(outcome) => info!(%sync_id, ?outcome, "Processing run finished"),
                Err(e) => error!(%sync_id, error = %e, "Processing run aborted"),
            }
        });
    }

    /// Create a sync and run it to the end of its streaming pass
    pub async fn run_now(&self, sync_type: SyncType) -> Result<(SyncRecord, SyncOutcome)> {
        let record = self.create(sync_type).await?;
        let outcome = self.pipeline.run(record.id).await?;
        let record = self.get(record.id).await?;
        Ok((record, outcome))
    }

    /// Cancel a `pending` or `downloading` sync
    ///
    /// `cancelled_at` is stamped only when live in-flight work was stopped. The write
    /// is conditional on the status read, so a download that completes in the meantime
    /// wins and the cancel reports an invalid transition instead.
    pub async fn cancel(&self, id: Uuid) -> Result<SyncRecord> {
        let mut removed = false;
        loop {
            let current = self.get(id).await?;
            if removed && current.status == DownloadStatus::Cancelled {
                // The pipeline settled the cancel after its token fired
                return Ok(current);
            }

            let expected = current.status;
            current.clone().cancel(false)?;
            removed |= self.registry.cancel(id);

            let mut record = current;
            record.cancel(removed)?;
            if self.store.save_state_if(&record, expected).await? {
                info!(sync_id = %id, sync_type = %record.sync_type, removed, "Sync cancelled");
                return Ok(record);
            }
            debug!(sync_id = %id, "Sync changed state during cancel, retrying");
        }
    }

    /// Queue the processing phase of a downloaded sync again
    ///
    /// A finished phase is simply requeued. A `queued`/`processing` phase is recovered
    /// only when this process is not running it, i.e. its owner died.
    pub async fn restart_processing(&self, id: Uuid) -> Result<SyncRecord> {
        let mut record = self.get(id).await?;
        if record.processing_in_flight() {
            if self.pipeline.is_processing(id) {
                return Err(SyncError::ProcessingInProgress(id));
            }
            record.recover_processing()?;
        } else {
            record.queue_processing()?;
        }
        if record.file_path.is_none() {
            return Err(SyncError::Validation(
                "downloaded file is no longer available".to_string(),
            ));
        }
        self.store.save_state(&record).await?;
        self.spawn_process(id);

        info!(sync_id = %id, sync_type = %record.sync_type, "Processing restarted");
        Ok(record)
    }

    /// Pick up syncs a previous process left mid-flight
    ///
    /// Pending syncs run again from the start, interrupted downloads fail (their partial
    /// file is gone with the process) and unfinished processing phases are requeued.
    /// Returns how many records were touched.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let stale = self.store.interrupted().await?;

        for mut record in stale.iter().cloned() {
            let sync_id = record.id;
            match record.status {
                DownloadStatus::Pending => {
                    info!(%sync_id, sync_type = %record.sync_type, "Resuming pending sync");
                    self.registry.register(sync_id);
                    self.spawn_run(sync_id);
                },
                DownloadStatus::Downloading => {
                    record.fail(INTERRUPTED_MESSAGE)?;
                    if self
                        .store
                        .save_state_if(&record, DownloadStatus::Downloading)
                        .await?
                    {
                        warn!(%sync_id, sync_type = %record.sync_type, "Interrupted download failed");
                    }
                },
                _ if self.pipeline.is_processing(sync_id) => {},
                _ if record.file_path.is_none() => {
                    record.fail_processing()?;
                    self.store.save_state(&record).await?;
                    warn!(%sync_id, "Interrupted processing has no file left, marked failed");
                },
                _ => {
                    record.recover_processing()?;
                    self.store.save_state(&record).await?;
                    info!(%sync_id, sync_type = %record.sync_type, "Resuming interrupted processing");
                    self.spawn_process(sync_id);
                },
            }
        }

        Ok(stale.len())
    }

    /// Empty the failure log of a sync
    pub async fn clear_failures(&self, id: Uuid) -> Result<SyncRecord> {
        if !self.store.clear_failures(id).await? {
            return Err(SyncError::NotFound(id));
        }
        info!(sync_id = %id, "Failure log cleared");
        self.get(id).await
    }
}
