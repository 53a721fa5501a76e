//! Data models for catalog syncs
//!
//! A [`SyncRecord`] tracks one ingestion attempt for one [`SyncType`]. It carries two
//! independent state machines:
//!
//! - the download phase ([`DownloadStatus`]): `pending -> downloading -> completed | failed`,
//!   with `cancelled` reachable from `pending` and `downloading`
//! - the processing phase ([`ProcessingStatus`]): unset `-> queued -> processing ->
//!   completed | failed`, only meaningful once the download completed
//!
//! Transitions are pure functions over the status enums so they can be tested without
//! any persistence. The record methods apply them and stamp timestamps.

use chrono::{DateTime, Duration, Utc};
use grimoire_common::SyncType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metadata::BulkMetadata;

/// Rejected state transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {event} a sync whose {phase} status is {state}")]
pub struct TransitionError {
    pub phase: &'static str,
    pub state: String,
    pub event: &'static str,
}

impl TransitionError {
    fn download(state: DownloadStatus, event: DownloadEvent) -> Self {
        Self {
            phase: "download",
            state: state.to_string(),
            event: event.as_str(),
        }
    }

    fn processing(state: Option<ProcessingStatus>, event: ProcessingEvent) -> Self {
        Self {
            phase: "processing",
            state: state.map_or_else(|| "unset".to_string(), |s| s.to_string()),
            event: event.as_str(),
        }
    }
}

/// Download-phase status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

/// Events driving the download phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadEvent {
    Start,
    Complete,
    Fail,
    Cancel,
}

impl DownloadEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadEvent::Start => "start",
            DownloadEvent::Complete => "complete",
            DownloadEvent::Fail => "fail",
            DownloadEvent::Cancel => "cancel",
        }
    }
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    /// `pending` or `downloading`; at most one active record per sync type
    pub fn is_active(&self) -> bool {
        matches!(self, DownloadStatus::Pending | DownloadStatus::Downloading)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Apply `event`, returning the next status
    pub fn transition(self, event: DownloadEvent) -> Result<Self, TransitionError> {
        use DownloadEvent as E;
        use DownloadStatus as S;

        match (self, event) {
            (S::Pending, E::Start) => Ok(S::Downloading),
            (S::Downloading, E::Complete) => Ok(S::Completed),
            (S::Pending | S::Downloading, E::Fail) => Ok(S::Failed),
            (S::Pending | S::Downloading, E::Cancel) => Ok(S::Cancelled),
            (state, event) => Err(TransitionError::download(state, event)),
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DownloadStatus::Pending),
            "downloading" => Ok(DownloadStatus::Downloading),
            "completed" => Ok(DownloadStatus::Completed),
            "failed" => Ok(DownloadStatus::Failed),
            "cancelled" => Ok(DownloadStatus::Cancelled),
            other => Err(format!("Invalid download status: {}", other)),
        }
    }
}

/// Processing-phase status; `None` on the record means the phase never began
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// Events driving the processing phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingEvent {
    Queue,
    Start,
    Complete,
    Fail,
    /// Requeue a phase whose owner went away mid-run
    Recover,
}

impl ProcessingEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingEvent::Queue => "queue processing of",
            ProcessingEvent::Start => "start processing",
            ProcessingEvent::Complete => "complete processing of",
            ProcessingEvent::Fail => "fail processing of",
            ProcessingEvent::Recover => "recover processing of",
        }
    }
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Queued => "queued",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// Apply `event` to the (possibly unset) current status
    ///
    /// A finished phase may be queued again, which is how processing restarts. An
    /// unfinished one may only be recovered, and only once nothing is running it.
    pub fn transition(
        current: Option<Self>,
        event: ProcessingEvent,
    ) -> Result<Self, TransitionError> {
        use ProcessingEvent as E;
        use ProcessingStatus as S;

        match (current, event) {
            (None | Some(S::Completed) | Some(S::Failed), E::Queue) => Ok(S::Queued),
            (Some(S::Queued), E::Start) => Ok(S::Processing),
            (Some(S::Processing), E::Complete) => Ok(S::Completed),
            (Some(S::Queued) | Some(S::Processing), E::Fail) => Ok(S::Failed),
            (Some(S::Queued) | Some(S::Processing), E::Recover) => Ok(S::Queued),
            (state, event) => Err(TransitionError::processing(state, event)),
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ProcessingStatus::Queued),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(format!("Invalid processing status: {}", other)),
        }
    }
}

/// One entry of a sync's failure log
///
/// Appended on batch-level failures and failed processing phases; removed only by an
/// explicit operator action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub timestamp: DateTime<Utc>,
    pub error: String,
    pub batch_number: Option<i64>,
    pub context: serde_json::Value,
}

impl FailureEntry {
    pub fn new(
        error: impl Into<String>,
        batch_number: Option<i64>,
        context: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            error: error.into(),
            batch_number,
            context,
        }
    }
}

/// Persistent record of one ingestion attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: Uuid,
    pub sync_type: SyncType,

    // Download phase
    pub status: DownloadStatus,
    pub version: Option<String>,
    pub download_uri: Option<String>,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,

    // Processing phase
    pub processing_status: Option<ProcessingStatus>,
    pub total_records: Option<i64>,
    /// Records read and queued for import (updated at dispatch time)
    pub processed_records: i64,
    /// Records the mapper accepted (updated by batch workers)
    pub imported_records: i64,
    pub last_processed_batch: i64,
    pub batch_size: Option<i64>,
    pub failed_batches: i64,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,

    pub failure_log: Vec<FailureEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncRecord {
    /// New `pending` record for `sync_type`
    pub fn new(sync_type: SyncType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sync_type,
            status: DownloadStatus::Pending,
            version: None,
            download_uri: None,
            file_path: None,
            file_size: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            error_message: None,
            processing_status: None,
            total_records: None,
            processed_records: 0,
            imported_records: 0,
            last_processed_batch: 0,
            batch_size: None,
            failed_batches: 0,
            processing_started_at: None,
            processing_completed_at: None,
            failure_log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Pin the remote export this record will ingest
    pub fn with_metadata(mut self, metadata: &BulkMetadata) -> Self {
        self.apply_metadata(metadata);
        self
    }

    pub fn apply_metadata(&mut self, metadata: &BulkMetadata) {
        self.version = Some(metadata.version.clone());
        self.download_uri = Some(metadata.download_uri.clone());
        self.file_size = Some(metadata.size);
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Processing was queued or started and has not finished
    pub fn processing_in_flight(&self) -> bool {
        matches!(
            self.processing_status,
            Some(ProcessingStatus::Queued | ProcessingStatus::Processing)
        )
    }

    /// Move `pending -> downloading`
    ///
    /// Returns `false` and leaves the record untouched when it is not pending.
    pub fn start(&mut self) -> bool {
        match self.status.transition(DownloadEvent::Start) {
            Ok(next) => {
                self.status = next;
                self.started_at = Some(Utc::now());
                true
            },
            Err(_) => false,
        }
    }

    /// Move `downloading -> completed`, recording where the file landed
    pub fn complete(
        &mut self,
        file_path: impl Into<String>,
        file_size: i64,
    ) -> Result<(), TransitionError> {
        self.status = self.status.transition(DownloadEvent::Complete)?;
        self.file_path = Some(file_path.into());
        self.file_size = Some(file_size);
        self.completed_at = Some(Utc::now());
        self.error_message = None;
        Ok(())
    }

    /// Terminal failure of the download phase
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.status = self.status.transition(DownloadEvent::Fail)?;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Terminal cancellation; `cancelled_at` is stamped only when the in-flight work
    /// was actually removed
    pub fn cancel(&mut self, work_removed: bool) -> Result<(), TransitionError> {
        self.status = self.status.transition(DownloadEvent::Cancel)?;
        if work_removed {
            self.cancelled_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Stamp `cancelled_at` on a sync cancelled before its transfer was stopped
    ///
    /// Returns `false` when there was nothing to stamp.
    pub fn note_work_removed(&mut self) -> bool {
        if self.status != DownloadStatus::Cancelled || self.cancelled_at.is_some() {
            return false;
        }
        self.cancelled_at = Some(Utc::now());
        true
    }

    fn require_downloaded(&self, event: ProcessingEvent) -> Result<(), TransitionError> {
        if self.status == DownloadStatus::Completed {
            Ok(())
        } else {
            Err(TransitionError {
                phase: "download",
                state: self.status.to_string(),
                event: event.as_str(),
            })
        }
    }

    fn apply_processing(&mut self, event: ProcessingEvent) -> Result<(), TransitionError> {
        self.require_downloaded(event)?;
        self.processing_status = Some(ProcessingStatus::transition(self.processing_status, event)?);
        Ok(())
    }

    pub fn queue_processing(&mut self) -> Result<(), TransitionError> {
        self.apply_processing(ProcessingEvent::Queue)
    }

    /// Put an abandoned `queued`/`processing` phase back in the queue
    pub fn recover_processing(&mut self) -> Result<(), TransitionError> {
        self.apply_processing(ProcessingEvent::Recover)
    }

    /// Begin a processing pass; progress counters restart from zero
    pub fn start_processing(
        &mut self,
        total_records: i64,
        batch_size: i64,
    ) -> Result<(), TransitionError> {
        self.apply_processing(ProcessingEvent::Start)?;
        self.total_records = Some(total_records);
        self.batch_size = Some(batch_size);
        self.processed_records = 0;
        self.imported_records = 0;
        self.last_processed_batch = 0;
        self.failed_batches = 0;
        self.processing_started_at = Some(Utc::now());
        self.processing_completed_at = None;
        Ok(())
    }

    pub fn complete_processing(&mut self) -> Result<(), TransitionError> {
        self.apply_processing(ProcessingEvent::Complete)?;
        self.processing_completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail_processing(&mut self) -> Result<(), TransitionError> {
        self.apply_processing(ProcessingEvent::Fail)?;
        self.processing_completed_at = Some(Utc::now());
        Ok(())
    }

    /// Percentage of `total_records` dispatched so far, rounded to two decimals
    pub fn processing_progress_percentage(&self) -> f64 {
        match self.total_records {
            Some(total) if total > 0 => {
                let pct = (self.processed_records.max(0) as f64 / total as f64) * 100.0;
                (pct.min(100.0) * 100.0).round() / 100.0
            },
            _ => 0.0,
        }
    }

    /// Projected end of the processing phase; `None` means unknown
    pub fn estimated_completion_time(&self) -> Option<DateTime<Utc>> {
        self.estimated_completion_time_at(Utc::now())
    }

    /// Linear projection from the observed throughput up to `now`
    pub fn estimated_completion_time_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let started = self.processing_started_at?;
        if self.processed_records <= 0 {
            return None;
        }
        if self.processing_status == Some(ProcessingStatus::Completed) {
            return self.processing_completed_at;
        }

        let total = self.total_records?;
        let elapsed_ms = (now - started).num_milliseconds().max(0) as f64;
        let per_record_ms = elapsed_ms / self.processed_records as f64;
        let remaining = (total - self.processed_records).max(0) as f64;

        Some(now + Duration::milliseconds((per_record_ms * remaining).round() as i64))
    }

    /// True when `other` already ingested the version this record points at
    pub fn is_redundant_with(&self, other: &SyncRecord) -> bool {
        other.id != self.id
            && other.sync_type == self.sync_type
            && other.status == DownloadStatus::Completed
            && self.version.is_some()
            && other.version == self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloaded() -> SyncRecord {
        let mut record = SyncRecord::new(SyncType::OracleCards);
        assert!(record.start());
        record.complete("storage/catalog/oracle_cards/oracle.json", 1024).unwrap();
        record
    }

    #[test]
    fn test_download_transitions() {
        use DownloadEvent as E;
        use DownloadStatus as S;

        assert_eq!(S::Pending.transition(E::Start), Ok(S::Downloading));
        assert_eq!(S::Downloading.transition(E::Complete), Ok(S::Completed));
        assert_eq!(S::Pending.transition(E::Fail), Ok(S::Failed));
        assert_eq!(S::Downloading.transition(E::Cancel), Ok(S::Cancelled));
        assert!(S::Pending.transition(E::Complete).is_err());
        assert!(S::Downloading.transition(E::Start).is_err());
        assert!(S::Completed.transition(E::Fail).is_err());
        assert!(S::Completed.transition(E::Cancel).is_err());
        assert!(S::Cancelled.transition(E::Start).is_err());
    }

    #[test]
    fn test_processing_transitions() {
        use ProcessingEvent as E;
        use ProcessingStatus as S;

        assert_eq!(S::transition(None, E::Queue), Ok(S::Queued));
        assert_eq!(S::transition(Some(S::Queued), E::Start), Ok(S::Processing));
        assert_eq!(S::transition(Some(S::Processing), E::Complete), Ok(S::Completed));
        assert_eq!(S::transition(Some(S::Processing), E::Fail), Ok(S::Failed));
        assert_eq!(S::transition(Some(S::Completed), E::Queue), Ok(S::Queued));
        assert!(S::transition(None, E::Start).is_err());
        assert!(S::transition(Some(S::Queued), E::Complete).is_err());
        assert!(S::transition(Some(S::Processing), E::Queue).is_err());
    }

    #[test]
    fn test_recover_requeues_unfinished_processing() {
        use ProcessingEvent as E;
        use ProcessingStatus as S;

        assert_eq!(S::transition(Some(S::Queued), E::Recover), Ok(S::Queued));
        assert_eq!(S::transition(Some(S::Processing), E::Recover), Ok(S::Queued));
        assert!(S::transition(None, E::Recover).is_err());
        assert!(S::transition(Some(S::Completed), E::Recover).is_err());
        assert!(S::transition(Some(S::Failed), E::Recover).is_err());

        let mut record = downloaded();
        record.queue_processing().unwrap();
        record.start_processing(4, 2).unwrap();
        assert!(record.processing_in_flight());
        record.recover_processing().unwrap();
        assert_eq!(record.processing_status, Some(S::Queued));
        record.start_processing(4, 2).unwrap();
        assert_eq!(record.processed_records, 0);
    }

    #[test]
    fn test_note_work_removed_only_stamps_unstamped_cancels() {
        let mut record = SyncRecord::new(SyncType::Rulings);
        assert!(!record.note_work_removed());

        record.cancel(false).unwrap();
        assert!(record.note_work_removed());
        assert!(record.cancelled_at.is_some());
        assert!(!record.note_work_removed());
    }

    #[test]
    fn test_start_is_noop_unless_pending() {
        let mut record = SyncRecord::new(SyncType::Rulings);
        assert!(record.start());
        let started_at = record.started_at;

        assert!(!record.start());
        assert_eq!(record.status, DownloadStatus::Downloading);
        assert_eq!(record.started_at, started_at);
    }

    #[test]
    fn test_complete_clears_error_message() {
        let mut record = SyncRecord::new(SyncType::DefaultCards);
        record.error_message = Some("previous attempt timed out".to_string());
        record.start();
        record.complete("/tmp/default.json", 42).unwrap();

        assert_eq!(record.status, DownloadStatus::Completed);
        assert!(record.error_message.is_none());
        assert!(record.completed_at.is_some());
        assert_eq!(record.file_size, Some(42));
    }

    #[test]
    fn test_fail_from_pending_sets_message() {
        let mut record = SyncRecord::new(SyncType::OracleCards);
        record.fail("Already have the latest version").unwrap();

        assert_eq!(record.status, DownloadStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("Already have the latest version"));
        assert!(record.completed_at.is_some());
        assert!(record.fail("again").is_err());
    }

    #[test]
    fn test_cancel_stamps_only_when_work_removed() {
        let mut removed = SyncRecord::new(SyncType::OracleCards);
        removed.cancel(true).unwrap();
        assert_eq!(removed.status, DownloadStatus::Cancelled);
        assert!(removed.cancelled_at.is_some());

        let mut orphaned = SyncRecord::new(SyncType::OracleCards);
        orphaned.start();
        orphaned.cancel(false).unwrap();
        assert_eq!(orphaned.status, DownloadStatus::Cancelled);
        assert!(orphaned.cancelled_at.is_none());
        assert!(orphaned.error_message.is_none());

        assert!(downloaded().cancel(true).is_err());
    }

    #[test]
    fn test_processing_requires_completed_download() {
        let mut record = SyncRecord::new(SyncType::OracleCards);
        assert!(record.queue_processing().is_err());
        record.start();
        assert!(record.queue_processing().is_err());

        let mut record = downloaded();
        record.queue_processing().unwrap();
        record.start_processing(10, 2).unwrap();
        record.complete_processing().unwrap();
        assert_eq!(record.processing_status, Some(ProcessingStatus::Completed));
        assert!(record.processing_completed_at.is_some());
    }

    #[test]
    fn test_restart_resets_progress() {
        let mut record = downloaded();
        record.queue_processing().unwrap();
        record.start_processing(10, 5).unwrap();
        record.processed_records = 10;
        record.last_processed_batch = 2;
        record.failed_batches = 1;
        record.fail_processing().unwrap();

        record.queue_processing().unwrap();
        record.start_processing(10, 5).unwrap();
        assert_eq!(record.processed_records, 0);
        assert_eq!(record.last_processed_batch, 0);
        assert_eq!(record.failed_batches, 0);
    }

    #[test]
    fn test_progress_percentage() {
        let mut record = downloaded();
        assert_eq!(record.processing_progress_percentage(), 0.0);

        record.total_records = Some(0);
        record.processed_records = 5;
        assert_eq!(record.processing_progress_percentage(), 0.0);

        record.total_records = Some(3);
        record.processed_records = 1;
        assert_eq!(record.processing_progress_percentage(), 33.33);

        let mut last = 0.0;
        for processed in 0..=3 {
            record.processed_records = processed;
            let pct = record.processing_progress_percentage();
            assert!(pct >= last);
            last = pct;
        }
        assert_eq!(last, 100.0);
    }

    #[test]
    fn test_estimated_completion_time_unknown() {
        let mut record = downloaded();
        record.total_records = Some(100);
        record.processed_records = 50;
        assert!(record.estimated_completion_time().is_none());

        record.processing_started_at = Some(Utc::now());
        record.processed_records = 0;
        assert!(record.estimated_completion_time().is_none());
    }

    #[test]
    fn test_estimated_completion_time_projection() {
        let mut record = downloaded();
        let start = Utc::now();
        record.processing_status = Some(ProcessingStatus::Processing);
        record.processing_started_at = Some(start);
        record.total_records = Some(100);
        record.processed_records = 25;

        let now = start + Duration::seconds(10);
        let eta = record.estimated_completion_time_at(now).unwrap();
        assert_eq!(eta, now + Duration::seconds(30));
    }

    #[test]
    fn test_is_redundant_with() {
        let mut latest = downloaded();
        latest.version = Some("2026-10-18T09:02:11+00:00".to_string());

        let mut candidate = SyncRecord::new(SyncType::OracleCards);
        assert!(!candidate.is_redundant_with(&latest));

        candidate.version = latest.version.clone();
        assert!(candidate.is_redundant_with(&latest));

        candidate.version = Some("2026-10-19T09:04:51+00:00".to_string());
        assert!(!candidate.is_redundant_with(&latest));
    }
}
