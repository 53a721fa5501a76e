//! Batch job dispatch
//!
//! [`BatchDispatcher`] is the enqueue side of the job runner. [`TaskDispatcher`] runs
//! jobs on tokio tasks. At most `max_concurrent` batches import at once, and a failed
//! batch is retried with exponential backoff until `max_attempts`.
//!
//! Without a queue limit every dispatched batch is spawned immediately. With
//! [`TaskDispatcher::with_queue_limit`], `dispatch` waits while that many batches are
//! still held (running, waiting for a permit or backing off), which bounds the memory a
//! fast reader can pin ahead of slow imports.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, warn};

use super::jobs::BatchImportJob;
use super::worker::BatchImportWorker;
use super::{Result, SyncError};

#[async_trait]
pub trait BatchDispatcher: Send + Sync {
    /// Enqueue one batch; returns once the job is accepted, not when it finishes
    async fn dispatch(&self, job: BatchImportJob) -> Result<()>;
}

pub struct TaskDispatcher {
    worker: BatchImportWorker,
    semaphore: Arc<Semaphore>,
    queue: Option<Arc<Semaphore>>,
    tasks: Mutex<JoinSet<()>>,
    max_attempts: u32,
    backoff: Duration,
}

impl TaskDispatcher {
    pub fn new(
        worker: BatchImportWorker,
        max_concurrent: usize,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            worker,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            queue: None,
            tasks: Mutex::new(JoinSet::new()),
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Hold at most `limit` undispatched-or-running batches in memory
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue = Some(Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    async fn queue_slot(&self) -> Result<Option<OwnedSemaphorePermit>> {
        match &self.queue {
            Some(queue) => queue
                .clone()
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| SyncError::Import("batch queue closed".to_string())),
            None => Ok(None),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of batch jobs not yet finished
    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Wait until every dispatched batch has finished, including retries
    pub async fn wait_idle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks());
            if tasks.is_empty() {
                return;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Batch import task panicked");
                }
            }
        }
    }
}

#[async_trait]
impl BatchDispatcher for TaskDispatcher {
    async fn dispatch(&self, job: BatchImportJob) -> Result<()> {
        let slot = self.queue_slot().await?;
        let worker = self.worker.clone();
        let semaphore = self.semaphore.clone();
        let max_attempts = self.max_attempts;
        let backoff = self.backoff;

        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            run_with_retry(worker, semaphore, job, max_attempts, backoff).await;
            drop(slot);
        });

        Ok(())
    }
}

async fn run_with_retry(
    worker: BatchImportWorker,
    semaphore: Arc<Semaphore>,
    job: BatchImportJob,
    max_attempts: u32,
    backoff: Duration,
) {
    for attempt in 1..=max_attempts {
        let result = {
            let Ok(_permit) = semaphore.acquire().await else {
                return;
            };
            worker.handle(&job).await
        };

        match result {
            Ok(_) => return,
            Err(e) if attempt < max_attempts => {
                let delay = backoff.saturating_mul(2u32.saturating_pow(attempt - 1));
                warn!(
                    sync_id = %job.sync_id,
                    batch_number = job.batch_number,
                    attempt,
                    max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying batch import"
                );
                tokio::time::sleep(delay).await;
            },
            Err(e) => {
                error!(
                    sync_id = %job.sync_id,
                    batch_number = job.batch_number,
                    attempts = max_attempts,
                    error = %e,
                    "Batch import exhausted retries"
                );
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::mapper::RecordMapper;
    use crate::ingest::models::SyncRecord;
    use crate::ingest::store::{MemorySyncStore, SyncStore};
    use async_trait::async_trait;
    use grimoire_common::SyncType;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails `prepare` for the first `failures` calls
    struct FlakyMapper {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordMapper for FlakyMapper {
        async fn prepare(&self) -> anyhow::Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                anyhow::bail!("transient failure");
            }
            Ok(())
        }

        async fn import_oracle_card(&self, _record: &Value) -> anyhow::Result<()> {
            Ok(())
        }

        async fn import_card_printing(&self, _record: &Value) -> anyhow::Result<()> {
            Ok(())
        }

        async fn import_ruling(&self, _record: &Value) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Blocks every batch until the gate is opened
    struct GatedMapper {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl RecordMapper for GatedMapper {
        async fn prepare(&self) -> anyhow::Result<()> {
            let _permit = self.gate.acquire().await?;
            Ok(())
        }

        async fn import_oracle_card(&self, _record: &Value) -> anyhow::Result<()> {
            Ok(())
        }

        async fn import_card_printing(&self, _record: &Value) -> anyhow::Result<()> {
            Ok(())
        }

        async fn import_ruling(&self, _record: &Value) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn job(sync_id: uuid::Uuid, batch_number: i64) -> BatchImportJob {
        BatchImportJob {
            sync_id,
            sync_type: SyncType::OracleCards,
            batch_number,
            records: vec![json!({ "oracle_id": "a" }), json!({ "oracle_id": "b" })],
        }
    }

    async fn run(failures: usize, max_attempts: u32, batches: i64) -> SyncRecord {
        let store = Arc::new(MemorySyncStore::new());
        let record = SyncRecord::new(SyncType::OracleCards);
        store.insert(&record).await.unwrap();

        let mapper = Arc::new(FlakyMapper {
            failures,
            calls: AtomicUsize::new(0),
        });
        let worker = BatchImportWorker::new(store.clone(), mapper);
        let dispatcher = TaskDispatcher::new(worker, 2, max_attempts, Duration::from_millis(1));

        for batch_number in 1..=batches {
            dispatcher.dispatch(job(record.id, batch_number)).await.unwrap();
        }
        dispatcher.wait_idle().await;
        assert_eq!(dispatcher.pending(), 0);

        store.get(record.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_all_batches_import() {
        let stored = run(0, 3, 5).await;
        assert_eq!(stored.imported_records, 10);
        assert_eq!(stored.failed_batches, 0);
    }

    #[tokio::test]
    async fn test_failed_attempt_is_retried() {
        let stored = run(1, 3, 1).await;
        assert_eq!(stored.imported_records, 2);
        assert_eq!(stored.failed_batches, 1);
        assert_eq!(stored.failure_log.len(), 1);
    }

    #[tokio::test]
    async fn test_queue_limit_holds_back_the_producer() {
        let store = Arc::new(MemorySyncStore::new());
        let record = SyncRecord::new(SyncType::OracleCards);
        store.insert(&record).await.unwrap();

        let gate = Arc::new(Semaphore::new(0));
        let mapper = Arc::new(GatedMapper { gate: gate.clone() });
        let worker = BatchImportWorker::new(store.clone(), mapper);
        let dispatcher =
            TaskDispatcher::new(worker, 4, 1, Duration::from_millis(1)).with_queue_limit(1);

        dispatcher.dispatch(job(record.id, 1)).await.unwrap();
        let second =
            tokio::time::timeout(Duration::from_millis(50), dispatcher.dispatch(job(record.id, 2)))
                .await;
        assert!(second.is_err(), "dispatch must wait for a free queue slot");
        assert_eq!(dispatcher.pending(), 1);

        gate.add_permits(16);
        dispatcher.dispatch(job(record.id, 2)).await.unwrap();
        dispatcher.wait_idle().await;

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.imported_records, 4);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let stored = run(usize::MAX, 3, 1).await;
        assert_eq!(stored.imported_records, 0);
        assert_eq!(stored.failed_batches, 3);
    }
}
