//! Sync queries

pub mod get_sync;
pub mod list_syncs;

pub use get_sync::GetSyncQuery;
pub use list_syncs::{ListSyncsQuery, ListSyncsResponse};
