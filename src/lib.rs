//! Fragility Engine - Decision fragility scoring over user behavior event logs
//!
//! The engine turns one user's ordered action events for a period into a
//! deterministic, reproducible stability metric through a fixed pipeline:
//! transition graph → volatility metrics → fragility score → classification.
//!
//! ## Modules
//!
//! - **Scoring core**: [`graph`], [`metrics`], [`scorer`], [`pipeline`]
//! - **Engine**: [`engine`] coordinates the action log, single-flight
//!   computation and the report store
//! - **Read path**: [`explorer`] annotates raw sequences for drill-down
//! - **Boundaries**: [`ingest`] validates raw events, [`store`] defines the
//!   storage seams

pub mod config;
pub mod engine;
pub mod error;
pub mod explorer;
pub mod graph;
pub mod ingest;
pub mod metrics;
pub mod period;
pub mod pipeline;
pub mod report;
pub mod scorer;
pub mod store;
pub mod types;

#[cfg(feature = "cli")]
pub mod telemetry;

pub use config::{EngineConfig, EntropyBasis, ReversalRule, ScoreWeights, ALGORITHM_VERSION};
pub use engine::FragilityEngine;
pub use error::EngineError;
pub use period::{PeriodId, PeriodScheme};
pub use pipeline::score_period;
pub use types::{
    ActionEvent, ActionType, Classification, FragilityReport, NewActionEvent, ReportState,
    StoredReport, TimeRange,
};

// Ingestion exports
pub use ingest::{RawActionAdapter, RawActionEvent};

/// Engine version
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the command-line tool
pub const PRODUCER_NAME: &str = "fragility-engine";
