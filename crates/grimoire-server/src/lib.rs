//! Grimoire Server Library
//!
//! Ingests versioned bulk exports from a card catalog and imports them into
//! PostgreSQL.
//!
//! # Overview
//!
//! - **Ingest** ([`ingest`]): the sync-and-batch-import pipeline. A sync record moves
//!   through metadata lookup, version comparison, a cancellable chunked download and
//!   one streaming pass that fans records out into independent import batches.
//! - **API** ([`api`], [`features`]): `/api/v1/syncs` for progress polling and operator
//!   actions, plus `/health`.
//! - **Configuration** ([`config`]): environment-based, `.env` aware.
//! - **Database** ([`db`]): pool creation and migrations.
//!
//! # Architecture
//!
//! Feature slices follow the command/query split used across the server: queries
//! read sync records, commands trigger or alter them. Both go through
//! [`ingest::SyncService`], which is also what the CLI and the automatic
//! orchestrator use.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use grimoire_server::ingest::{MemorySyncStore, SyncConfig, SyncService};
//! # use grimoire_server::ingest::RecordMapper;
//!
//! # async fn run(mapper: Arc<dyn RecordMapper>) -> anyhow::Result<()> {
//! let config = SyncConfig::from_env()?;
//! let store = Arc::new(MemorySyncStore::new());
//! let (service, dispatcher) = SyncService::from_config(&config, store, mapper)?;
//!
//! let (record, outcome) = service.run_now("rulings".parse()?).await?;
//! dispatcher.wait_idle().await;
//! println!("{} -> {:?}", record.id, outcome);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;

// Re-export commonly used types
pub use error::AppError;
