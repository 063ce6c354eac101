//! Storage seams
//!
//! The engine talks to two collaborators through these traits: an append-only
//! action log and a report store with per-key upsert semantics. In-memory
//! implementations live in [`memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{ActionEvent, FragilityReport, NewActionEvent, ReportEntry, ReportKey, TimeRange};

pub mod memory;

pub use memory::{InMemoryActionLog, InMemoryReportStore};

/// Errors returned by storage implementations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The backend cannot be reached right now; the caller may retry
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure (corruption, serialization, poisoned lock)
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Append-only, per-user ordered store of action events.
///
/// Implementations must be `Send + Sync + 'static` so one log can be shared
/// by every computation task.
#[async_trait]
pub trait ActionLog: Send + Sync + 'static {
    /// Append a batch atomically, assigning each event the next per-user
    /// sequence number (starting at 1) in batch order.
    async fn append(&self, events: Vec<NewActionEvent>) -> Result<Vec<ActionEvent>, StoreError>;

    /// Events of `user_id` whose timestamp lies in `range`, ordered by
    /// `(timestamp, sequence_no)`.
    async fn events_in_range(
        &self,
        user_id: &str,
        range: &TimeRange,
    ) -> Result<Vec<ActionEvent>, StoreError>;
}

/// Report persistence keyed by `(user_id, period_id)`.
///
/// Absence of an entry is the `NONE` state. Writes for one key are serialized
/// by the engine; implementations only need each call to be atomic.
#[async_trait]
pub trait ReportStore: Send + Sync + 'static {
    async fn get(&self, key: &ReportKey) -> Result<Option<ReportEntry>, StoreError>;

    /// Move the key to `COMPUTING`, creating the entry if needed. A previous
    /// report stays attached to the entry.
    async fn begin_computing(&self, key: &ReportKey) -> Result<ReportEntry, StoreError>;

    /// Replace the report for its key. The entry lands in `STALE` when events
    /// newer than the report's watermark were seen meanwhile, else `COMPUTED`.
    async fn upsert(
        &self,
        report: FragilityReport,
        computation_id: Uuid,
        stored_at: DateTime<Utc>,
    ) -> Result<ReportEntry, StoreError>;

    /// Move the key to `FAILED`, keeping any previous report readable.
    async fn mark_failed(&self, key: &ReportKey, reason: &str) -> Result<ReportEntry, StoreError>;

    /// Record a new event for every stored period of `user_id` containing
    /// `at`. Computed reports whose watermark is below `sequence_no` become
    /// `STALE`; their keys are returned.
    async fn mark_stale_covering(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
        sequence_no: u64,
    ) -> Result<Vec<ReportKey>, StoreError>;

    /// Every entry stored for `user_id`
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ReportEntry>, StoreError>;
}
