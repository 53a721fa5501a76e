//! Feature modules implementing the Grimoire API
//!
//! Each feature is a vertical slice:
//! - `commands/` - write operations
//! - `queries/` - read operations
//! - `routes.rs` - HTTP route definitions
//! - `types.rs` - shared response types
//!
//! Commands and queries implement `mediator::Request` and are handled by plain async
//! functions taking the state they need.

pub mod shared;
pub mod syncs;

use axum::Router;

use crate::ingest::SyncService;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub service: SyncService,
}

/// Router with every feature mounted, to be nested under `/api/v1`
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().merge(syncs::syncs_routes().with_state(state.service))
}
