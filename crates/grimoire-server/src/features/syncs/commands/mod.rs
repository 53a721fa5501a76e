//! Sync commands

pub mod cancel_sync;
pub mod clear_failures;
pub mod restart_processing;
pub mod trigger_sync;

pub use cancel_sync::CancelSyncCommand;
pub use clear_failures::ClearFailuresCommand;
pub use restart_processing::RestartProcessingCommand;
pub use trigger_sync::TriggerSyncCommand;
