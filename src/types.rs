//! Core data types
//!
//! Plain value objects that flow between the action log, the transition graph
//! builder, the metrics calculator, the scorer and the report store. None of
//! them know how they are persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::period::PeriodId;

/// Closed set of user actions the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Login,
    Logout,
    Browse,
    AddToCart,
    RemoveFromCart,
    Purchase,
    Cancel,
    RefundRequest,
}

impl ActionType {
    /// Every action, in declaration order
    pub const ALL: [ActionType; 8] = [
        ActionType::Login,
        ActionType::Logout,
        ActionType::Browse,
        ActionType::AddToCart,
        ActionType::RemoveFromCart,
        ActionType::Purchase,
        ActionType::Cancel,
        ActionType::RefundRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Login => "login",
            ActionType::Logout => "logout",
            ActionType::Browse => "browse",
            ActionType::AddToCart => "add_to_cart",
            ActionType::RemoveFromCart => "remove_from_cart",
            ActionType::Purchase => "purchase",
            ActionType::Cancel => "cancel",
            ActionType::RefundRequest => "refund_request",
        }
    }

    /// Parse the snake_case wire name of an action
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event as submitted for ingestion, before the log assigns a sequence number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewActionEvent {
    pub user_id: String,
    pub action_type: ActionType,
    pub timestamp: DateTime<Utc>,
}

impl NewActionEvent {
    pub fn new(user_id: impl Into<String>, action_type: ActionType, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            action_type,
            timestamp,
        }
    }
}

/// A recorded, immutable action event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub user_id: String,
    pub action_type: ActionType,
    pub timestamp: DateTime<Utc>,
    /// Per-user position assigned by the action log, starting at 1
    pub sequence_no: u64,
}

impl ActionEvent {
    /// Total-order key: timestamp first, sequence number breaks ties
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence_no)
    }
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, returning `None` when `end` is not after `start`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Identity of a report: one user, one period
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReportKey {
    pub user_id: String,
    pub period_id: PeriodId,
}

impl ReportKey {
    pub fn new(user_id: impl Into<String>, period_id: PeriodId) -> Self {
        Self {
            user_id: user_id.into(),
            period_id,
        }
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.period_id)
    }
}

/// Aggregated statistics for one `(from, to)` transition type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEdge {
    pub from: ActionType,
    pub to: ActionType,
    /// Number of occurrences
    pub count: u32,
    /// How many of those occurrences were flagged as reversals
    pub reversal_count: u32,
    /// Timestamp of the first occurrence (its `to` event)
    pub first_at: DateTime<Utc>,
    /// Timestamp of the last occurrence (its `to` event)
    pub last_at: DateTime<Utc>,
}

/// One consecutive pair of events within a sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionStep {
    pub from: ActionType,
    pub to: ActionType,
    /// When the transition completed (timestamp of the `to` event)
    pub at: DateTime<Utc>,
    pub from_sequence_no: u64,
    pub to_sequence_no: u64,
    pub reversal: bool,
}

/// Directed multigraph of action transitions for one ordered sequence
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransitionGraph {
    /// Edges sorted by `(from, to)`
    pub edges: Vec<TransitionEdge>,
    /// Individual transitions in sequence order
    pub steps: Vec<TransitionStep>,
    /// Sum of all edge counts (event_count - 1, or 0)
    pub total_transitions: u32,
    /// Distinct actions observed, sorted
    pub distinct_actions: Vec<ActionType>,
    /// Number of events the graph was built from
    pub event_count: u32,
    /// Timestamp of the newest event, if any
    pub last_event_at: Option<DateTime<Utc>>,
}

impl TransitionGraph {
    /// Look up the edge for a `(from, to)` pair
    pub fn edge(&self, from: ActionType, to: ActionType) -> Option<&TransitionEdge> {
        self.edges
            .binary_search_by(|e| (e.from, e.to).cmp(&(from, to)))
            .ok()
            .map(|i| &self.edges[i])
    }

    pub fn reversal_count(&self) -> u32 {
        self.edges.iter().map(|e| e.reversal_count).sum()
    }

    /// True when there are too few events to form a transition
    pub fn is_insufficient(&self) -> bool {
        self.total_transitions == 0
    }
}

/// Volatility metrics derived from a transition graph
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VolatilityMetrics {
    /// Reversal transitions / total transitions (0-1)
    pub reversal_rate: f64,
    /// Normalized Shannon entropy of the transition-type distribution (0-1)
    pub transition_entropy: f64,
    /// Reversal rate with exponential recency decay applied (0-1)
    pub recency_weighted_reversal_rate: f64,
    pub event_count: u32,
    pub total_transitions: u32,
    pub reversal_count: u32,
    pub distinct_transitions: u32,
}

/// Volatility class of a fragility score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Low,
    Medium,
    High,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Low => "LOW",
            Classification::Medium => "MEDIUM",
            Classification::High => "HIGH",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic fragility report for one `(user, period)`
///
/// Every field is a function of the frozen input events, the configuration
/// and the algorithm version, so recomputing with the same inputs yields a
/// byte-identical serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragilityReport {
    pub user_id: String,
    pub period_id: PeriodId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Fragility score (0-1)
    pub score: f64,
    pub classification: Classification,
    /// As-of instant of the input: newest event timestamp, or period start when empty
    pub computed_at: DateTime<Utc>,
    pub input_event_count: u32,
    /// Largest sequence number among the input events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sequence_no: Option<u64>,
    pub insufficient_data: bool,
    pub algorithm_version: String,
    pub metrics: VolatilityMetrics,
    /// Per-action event counts
    pub action_counts: BTreeMap<ActionType, u32>,
}

impl FragilityReport {
    pub fn key(&self) -> ReportKey {
        ReportKey::new(self.user_id.clone(), self.period_id.clone())
    }
}

/// Lifecycle state of a stored report
///
/// `NONE` is represented by the absence of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportState {
    Computing,
    Computed,
    Failed,
    Stale,
}

/// Everything the report store keeps for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub key: ReportKey,
    pub state: ReportState,
    /// Last successfully computed report; survives failures and staleness
    pub report: Option<FragilityReport>,
    /// Reason of the most recent failure, cleared on success
    pub last_error: Option<String>,
    /// Largest sequence number seen for this period, including events that
    /// arrived after the report was computed
    pub newest_seen_sequence_no: Option<u64>,
    /// Wall-clock time of the last successful write
    pub stored_at: Option<DateTime<Utc>>,
    /// Identifier of the computation that produced `report`
    pub computation_id: Option<Uuid>,
}

impl ReportEntry {
    pub fn is_stale(&self) -> bool {
        self.state == ReportState::Stale
    }
}

/// A readable report together with its lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub report: FragilityReport,
    pub state: ReportState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computation_id: Option<Uuid>,
}

impl StoredReport {
    pub fn is_stale(&self) -> bool {
        self.state == ReportState::Stale
    }

    /// Convert an entry that holds a successful report
    pub fn from_entry(entry: ReportEntry) -> Option<Self> {
        let report = entry.report?;
        Some(Self {
            report,
            state: entry.state,
            last_error: entry.last_error,
            stored_at: entry.stored_at,
            computation_id: entry.computation_id,
        })
    }
}

/// Incoming transition of an explored event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionAnnotation {
    pub from: ActionType,
    pub reversal: bool,
}

/// A raw event annotated for human drill-down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedEvent {
    pub event: ActionEvent,
    /// Transition from the previous event in the explored range, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incoming: Option<TransitionAnnotation>,
}
