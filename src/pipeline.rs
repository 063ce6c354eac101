//! Scoring pipeline
//!
//! The pure core of the engine: a frozen event set plus a configuration in,
//! a fragility report out. No I/O, no clocks, no shared state.

use std::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::TransitionGraphBuilder;
use crate::metrics::VolatilityCalculator;
use crate::period::PeriodId;
use crate::scorer::FragilityScorer;
use crate::types::{ActionEvent, ActionType, Classification, FragilityReport, TimeRange};

/// Score one user's events for one period.
///
/// Events of other users or outside the period's range are ignored.
///
/// Pipeline stages:
/// 1. Select the period's events
/// 2. TransitionGraphBuilder - Build the transition graph
/// 3. VolatilityCalculator - Derive volatility metrics
/// 4. FragilityScorer - Score and classify
pub fn score_period(
    user_id: &str,
    period_id: &PeriodId,
    events: &[ActionEvent],
    config: &EngineConfig,
) -> Result<FragilityReport, EngineError> {
    config.validate()?;
    let range = period_id.range()?;
    Ok(score_range(user_id, period_id, range, events, config))
}

/// Same as [`score_period`] with the range already resolved and the config
/// already validated
pub(crate) fn score_range(
    user_id: &str,
    period_id: &PeriodId,
    range: TimeRange,
    events: &[ActionEvent],
    config: &EngineConfig,
) -> FragilityReport {
    // Stage 1: Select the period's events
    let selected: Vec<ActionEvent> = events
        .iter()
        .filter(|e| e.user_id == user_id && range.contains(e.timestamp))
        .cloned()
        .collect();

    let mut action_counts: BTreeMap<ActionType, u32> = BTreeMap::new();
    for event in &selected {
        *action_counts.entry(event.action_type).or_insert(0) += 1;
    }
    let last_sequence_no = selected.iter().map(|e| e.sequence_no).max();

    // Stage 2: Build the transition graph
    let graph = TransitionGraphBuilder::build(&selected, &config.reversal_rules);

    // Stage 3: Derive metrics
    let metrics = VolatilityCalculator::calculate(&graph, config);

    // Stage 4: Score and classify; too few events is not an error
    let insufficient_data = graph.is_insufficient();
    let (score, classification) = if insufficient_data {
        (0.0, Classification::Low)
    } else {
        let score = FragilityScorer::score(&metrics, &config.weights);
        (score, FragilityScorer::classify(score))
    };

    FragilityReport {
        user_id: user_id.to_string(),
        period_id: period_id.clone(),
        period_start: range.start,
        period_end: range.end,
        score,
        classification,
        computed_at: graph.last_event_at.unwrap_or(range.start),
        input_event_count: graph.event_count,
        last_sequence_no,
        insufficient_data,
        algorithm_version: config.algorithm_version.clone(),
        metrics,
        action_counts,
    }
}
