//! Shared fixtures for pipeline integration tests
//!
//! Everything runs in-process: a [`MemorySyncStore`], a `wiremock` server standing in
//! for the catalog API and its file host, and a temporary storage root.
//!
//! ```no_run
//! mod common;
//! use common::{Harness, DispatchMode};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = Harness::builder().batch_size(2).build().await;
//!     harness.mount_bulk(SyncType::OracleCards, "v1", &body).await;
//!     let record = harness.service.create(SyncType::OracleCards).await.unwrap();
//!     let outcome = harness.pipeline.run(record.id).await.unwrap();
//! }
//! ```

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use grimoire_common::SyncType;
use serde_json::{json, Value};
use tempfile::TempDir;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use grimoire_server::ingest::jobs::record_id;
use grimoire_server::ingest::{
    BatchDispatcher, BatchImportJob, BatchImportWorker, BulkDownloader, CancellationRegistry,
    CatalogClient, DownloadProgress, MemorySyncStore, RecordMapper, StreamingBatchProcessor,
    SyncPipeline, SyncService, SyncStorage, SyncStore, TaskDispatcher,
};

pub const PROVIDER: &str = "catalog";

// ============================================================================
// Mappers
// ============================================================================

/// Mapper that remembers imported record ids and rejects configured ones
#[derive(Default)]
pub struct RecordingMapper {
    imported: Mutex<Vec<String>>,
    rejected: HashSet<String>,
    fail_prepare: AtomicBool,
}

impl RecordingMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(ids: &[&str]) -> Self {
        Self {
            rejected: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Every batch fails before its record loop
    pub fn failing_prepare() -> Self {
        let mapper = Self::default();
        mapper.fail_prepare.store(true, Ordering::SeqCst);
        mapper
    }

    pub fn imported(&self) -> Vec<String> {
        let mut ids = self.imported.lock().unwrap().clone();
        ids.sort();
        ids
    }

    fn import(&self, record: &Value) -> anyhow::Result<()> {
        let id = record_id(record).ok_or_else(|| anyhow::anyhow!("record has no id"))?;
        if self.rejected.contains(&id) {
            anyhow::bail!("mapper rejected {}", id);
        }
        self.imported.lock().unwrap().push(id);
        Ok(())
    }
}

#[async_trait]
impl RecordMapper for RecordingMapper {
    async fn prepare(&self) -> anyhow::Result<()> {
        if self.fail_prepare.load(Ordering::SeqCst) {
            anyhow::bail!("target database unavailable");
        }
        Ok(())
    }

    async fn import_oracle_card(&self, record: &Value) -> anyhow::Result<()> {
        self.import(record)
    }

    async fn import_card_printing(&self, record: &Value) -> anyhow::Result<()> {
        self.import(record)
    }

    async fn import_ruling(&self, record: &Value) -> anyhow::Result<()> {
        self.import(record)
    }
}

// ============================================================================
// Dispatchers
// ============================================================================

/// Captures dispatched jobs without running them
#[derive(Default)]
pub struct RecordingDispatcher {
    jobs: Mutex<Vec<BatchImportJob>>,
}

impl RecordingDispatcher {
    pub fn jobs(&self) -> Vec<BatchImportJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchDispatcher for RecordingDispatcher {
    async fn dispatch(&self, job: BatchImportJob) -> grimoire_server::ingest::Result<()> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

pub enum DispatchMode {
    /// Jobs are only recorded
    Recording,
    /// Jobs run on a [`TaskDispatcher`] with the given attempts
    Tasks { max_attempts: u32 },
}

// ============================================================================
// Harness
// ============================================================================

pub struct HarnessBuilder {
    batch_size: usize,
    chunk_size: usize,
    mode: DispatchMode,
    mapper: Arc<RecordingMapper>,
    progress: Option<Arc<dyn DownloadProgress>>,
    registry: CancellationRegistry,
    status_poll: Option<Duration>,
}

impl HarnessBuilder {
    /// How often a running download re-reads its record
    pub fn status_poll(mut self, interval: Duration) -> Self {
        self.status_poll = Some(interval);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn tasks(mut self, max_attempts: u32) -> Self {
        self.mode = DispatchMode::Tasks { max_attempts };
        self
    }

    pub fn mapper(mut self, mapper: RecordingMapper) -> Self {
        self.mapper = Arc::new(mapper);
        self
    }

    pub fn progress(mut self, progress: Arc<dyn DownloadProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Share a registry with a progress callback built before the harness
    pub fn registry(mut self, registry: CancellationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub async fn build(self) -> Harness {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemorySyncStore::new());
        let dyn_store: Arc<dyn SyncStore> = store.clone();

        let recorder = Arc::new(RecordingDispatcher::default());
        let (dispatcher, tasks): (Arc<dyn BatchDispatcher>, Option<Arc<TaskDispatcher>>) =
            match self.mode {
                DispatchMode::Recording => (recorder.clone() as Arc<dyn BatchDispatcher>, None),
                DispatchMode::Tasks { max_attempts } => {
                    let worker = BatchImportWorker::new(dyn_store.clone(), self.mapper.clone());
                    let tasks = Arc::new(TaskDispatcher::new(
                        worker,
                        4,
                        max_attempts,
                        Duration::from_millis(1),
                    ));
                    (tasks.clone() as Arc<dyn BatchDispatcher>, Some(tasks))
                },
            };

        let client = reqwest::Client::new();
        let mut pipeline = SyncPipeline::new(
            dyn_store.clone(),
            Arc::new(CatalogClient::new(client.clone(), server.uri())),
            BulkDownloader::new(client, self.chunk_size),
            SyncStorage::new(dir.path(), PROVIDER),
            StreamingBatchProcessor::new(dyn_store, dispatcher, self.batch_size),
            self.registry,
        );
        if let Some(progress) = self.progress {
            pipeline = pipeline.with_progress(progress);
        }
        if let Some(interval) = self.status_poll {
            pipeline = pipeline.with_status_poll(interval);
        }
        let pipeline = Arc::new(pipeline);

        Harness {
            service: SyncService::new(pipeline.clone()),
            pipeline,
            store,
            server,
            dir,
            recorder,
            tasks,
            mapper: self.mapper,
        }
    }
}

pub struct Harness {
    pub service: SyncService,
    pub pipeline: Arc<SyncPipeline>,
    pub store: Arc<MemorySyncStore>,
    pub server: MockServer,
    pub dir: TempDir,
    pub recorder: Arc<RecordingDispatcher>,
    pub tasks: Option<Arc<TaskDispatcher>>,
    pub mapper: Arc<RecordingMapper>,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            batch_size: 500,
            chunk_size: 1024,
            mode: DispatchMode::Recording,
            mapper: Arc::new(RecordingMapper::new()),
            progress: None,
            registry: CancellationRegistry::new(),
            status_poll: None,
        }
    }

    pub fn file_url(&self, file_name: &str) -> String {
        format!("{}/files/{}", self.server.uri(), file_name)
    }

    /// Metadata body the catalog returns for `sync_type` at `version`
    pub fn metadata_body(&self, sync_type: SyncType, version: &str, size: usize) -> Value {
        json!({
            "object": "bulk_data",
            "type": sync_type.as_str(),
            "updated_at": version,
            "download_uri": self.file_url(&file_name(sync_type, version)),
            "size": size,
            "content_type": "application/json"
        })
    }

    /// Publish `body` as the latest `sync_type` export
    pub async fn mount_bulk(&self, sync_type: SyncType, version: &str, body: &str) {
        self.mount_metadata(sync_type, version, body.len(), None).await;
        self.mount_file(sync_type, version, body, None).await;
    }

    pub async fn mount_metadata(
        &self,
        sync_type: SyncType,
        version: &str,
        size: usize,
        expected: Option<u64>,
    ) {
        let mut mock = Mock::given(method("GET"))
            .and(path(format!("/bulk-data/{}", sync_type.as_str())))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(self.metadata_body(sync_type, version, size)),
            );
        if let Some(expected) = expected {
            mock = mock.expect(expected);
        }
        mock.mount(&self.server).await;
    }

    pub async fn mount_file(
        &self,
        sync_type: SyncType,
        version: &str,
        body: &str,
        expected: Option<u64>,
    ) {
        let mut mock = Mock::given(method("GET"))
            .and(path(format!("/files/{}", file_name(sync_type, version))))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()));
        if let Some(expected) = expected {
            mock = mock.expect(expected);
        }
        mock.mount(&self.server).await;
    }

    /// Wait for every dispatched batch when running with tasks
    pub async fn wait_idle(&self) {
        if let Some(tasks) = &self.tasks {
            tasks.wait_idle().await;
        }
    }

    pub fn storage_root(&self) -> &Path {
        self.dir.path()
    }
}

pub fn file_name(sync_type: SyncType, version: &str) -> String {
    format!("{}-{}.json", sync_type.as_str().replace('_', "-"), version)
}

// ============================================================================
// Log capture
// ============================================================================

/// One captured event: its message and string-rendered fields
#[derive(Debug, Clone, Default)]
pub struct CapturedEvent {
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl Visit for CapturedEvent {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{:?}", value);
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.fields.push((field.name().to_string(), rendered));
        }
    }
}

/// Layer keeping every `WARN` event
#[derive(Clone, Default)]
pub struct WarnCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl WarnCapture {
    /// Capture warnings on the current thread until the guard drops
    ///
    /// Only holds for current-thread runtimes, where spawned tasks share the thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.message == message)
            .cloned()
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for WarnCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::WARN {
            return;
        }
        let mut captured = CapturedEvent::default();
        event.record(&mut captured);
        self.events.lock().unwrap().push(captured);
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn oracle_card(id: &str) -> Value {
    json!({
        "object": "card",
        "oracle_id": id,
        "name": format!("Card {}", id),
        "type_line": "Creature - Elf Druid",
        "cmc": 2.0
    })
}

/// Pretty-printed bulk file of oracle cards
pub fn oracle_file(ids: &[&str]) -> String {
    let cards: Vec<Value> = ids.iter().map(|id| oracle_card(id)).collect();
    serde_json::to_string_pretty(&cards).unwrap()
}
