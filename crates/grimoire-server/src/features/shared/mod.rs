//! Shared utilities for feature modules
//!
//! - **pagination**: page/per-page parameters and response envelopes
//! - **error_helpers**: database constraint-violation checks

pub mod error_helpers;
pub mod pagination;

pub use pagination::{Paginated, PaginationMetadata, PaginationParams};
