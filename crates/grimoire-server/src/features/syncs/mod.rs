//! Syncs feature module
//!
//! Read/write surface over sync records: progress polling, failure logs, and the
//! operator actions (trigger, cancel, restart processing, clear failures).

pub mod commands;
pub mod queries;
pub mod routes;
pub mod types;

pub use routes::syncs_routes;
pub use types::SyncView;
