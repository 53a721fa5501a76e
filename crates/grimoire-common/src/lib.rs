//! Grimoire Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the Grimoire workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`GrimoireError`] and the [`Result`] alias
//! - **Logging**: centralized `tracing` subscriber setup ([`logging`])
//! - **Types**: catalog sync types shared by the server and its tooling ([`types`])
//!
//! # Example
//!
//! ```no_run
//! use grimoire_common::types::SyncType;
//!
//! fn parse(input: &str) -> grimoire_common::Result<SyncType> {
//!     input.parse()
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{GrimoireError, Result};
pub use types::SyncType;
