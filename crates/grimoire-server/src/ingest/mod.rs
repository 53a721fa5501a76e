//! Catalog sync and batch import pipeline
//!
//! One sync ingests one versioned bulk export for one [`SyncType`]:
//!
//! ```text
//! metadata -> version check -> download -> count -> stream/batch -> import
//! ```
//!
//! # Architecture
//!
//! - **models**: `SyncRecord` and its download/processing state machines
//! - **store**: persistence seam (`SyncStore`) with PostgreSQL and in-memory backends
//! - **metadata**: bulk-data discovery client
//! - **downloader**: chunked streaming download with cancellation between chunks
//! - **scanner**: incremental tokenizer yielding top-level array elements
//! - **counter**: pre-pass computing `total_records`
//! - **processor**: streaming batch builder and dispatcher
//! - **dispatcher**: in-process job runner for batch imports
//! - **worker**: per-batch import with record-level failure isolation
//! - **mapper**: record-to-table upserts
//! - **pipeline**: drives one sync end to end
//! - **service**: caller-facing operations (trigger, cancel, restart)
//! - **orchestrator**: periodic automatic syncs
//! - **schema**: field statistics over a bulk file

pub mod cancellation;
pub mod config;
pub mod counter;
pub mod dispatcher;
pub mod downloader;
pub mod jobs;
pub mod mapper;
pub mod metadata;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod processor;
pub mod scanner;
pub mod schema;
pub mod service;
pub mod storage;
pub mod store;
pub mod worker;

use grimoire_common::{GrimoireError, SyncType};
use uuid::Uuid;

pub use cancellation::CancellationRegistry;
pub use config::SyncConfig;
pub use counter::RecordCounter;
pub use dispatcher::{BatchDispatcher, TaskDispatcher};
pub use downloader::{BulkDownloader, DownloadProgress, DownloadedFile, TracingProgress};
pub use jobs::{BatchImportJob, BatchReport, ProcessingSummary};
pub use mapper::{PgRecordMapper, RecordMapper};
pub use metadata::{BulkMetadata, BulkMetadataSource, CatalogClient};
pub use models::{
    DownloadEvent, DownloadStatus, FailureEntry, ProcessingEvent, ProcessingStatus, SyncRecord,
    TransitionError,
};
pub use orchestrator::SyncOrchestrator;
pub use pipeline::{SyncOutcome, SyncPipeline};
pub use processor::StreamingBatchProcessor;
pub use scanner::ElementScanner;
pub use schema::{FieldStats, SchemaAnalyzer, SchemaReport};
pub use service::SyncService;
pub use storage::SyncStorage;
pub use store::{MemorySyncStore, PgSyncStore, SyncFilter, SyncStore};
pub use worker::BatchImportWorker;

/// Errors raised by the sync pipeline
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No bulk data published for {0}")]
    MetadataNotFound(SyncType),

    #[error("Sync not found: {0}")]
    NotFound(Uuid),

    #[error("A {0} sync is already pending or downloading")]
    AlreadyActive(SyncType),

    #[error("Invalid transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("Sync {0} was cancelled")]
    Cancelled(Uuid),

    #[error("Processing of sync {0} is already running")]
    ProcessingInProgress(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error(transparent)]
    Common(#[from] GrimoireError),
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled(_))
    }
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
