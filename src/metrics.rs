//! Volatility metrics
//!
//! Derives the three volatility signals from a transition graph:
//! - Reversal rate
//! - Normalized transition entropy
//! - Recency-weighted reversal rate

use std::collections::BTreeMap;

use crate::config::{EngineConfig, EntropyBasis};
use crate::types::{ActionType, TransitionGraph, VolatilityMetrics};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Calculator for volatility metrics
pub struct VolatilityCalculator;

impl VolatilityCalculator {
    /// Calculate metrics for a graph using the config's decay constant and
    /// entropy basis
    pub fn calculate(graph: &TransitionGraph, config: &EngineConfig) -> VolatilityMetrics {
        let reversal_rate = compute_reversal_rate(graph);
        let transition_entropy = match config.entropy_basis {
            EntropyBasis::Successor => compute_successor_entropy(graph),
            EntropyBasis::Pair => compute_pair_entropy(graph),
        };
        let recency_weighted_reversal_rate =
            compute_recency_weighted_reversal_rate(graph, config.decay_per_hour, reversal_rate);

        VolatilityMetrics {
            reversal_rate,
            transition_entropy,
            recency_weighted_reversal_rate,
            event_count: graph.event_count,
            total_transitions: graph.total_transitions,
            reversal_count: graph.reversal_count(),
            distinct_transitions: graph.edges.len() as u32,
        }
    }
}

/// Reversal transitions / total transitions
fn compute_reversal_rate(graph: &TransitionGraph) -> f64 {
    if graph.total_transitions == 0 {
        return 0.0;
    }
    (graph.reversal_count() as f64 / graph.total_transitions as f64).clamp(0.0, 1.0)
}

/// Shannon entropy of the `(from, to)` distribution, normalized by its
/// maximum `log2(distinct transition types)`
fn compute_pair_entropy(graph: &TransitionGraph) -> f64 {
    let counts: Vec<u32> = graph.edges.iter().map(|e| e.count).collect();
    normalized_entropy(&counts)
}

/// Σ over source actions of `(n_from / total) · normalized H(to | from)`
///
/// Zero whenever every action is always followed by the same action.
fn compute_successor_entropy(graph: &TransitionGraph) -> f64 {
    if graph.total_transitions == 0 {
        return 0.0;
    }

    let mut successors: BTreeMap<ActionType, Vec<u32>> = BTreeMap::new();
    for edge in &graph.edges {
        successors.entry(edge.from).or_default().push(edge.count);
    }

    let total = graph.total_transitions as f64;
    let entropy: f64 = successors
        .values()
        .map(|counts| {
            let leaving: u32 = counts.iter().sum();
            (leaving as f64 / total) * normalized_entropy(counts)
        })
        .sum();

    entropy.clamp(0.0, 1.0)
}

/// `H / log2(k)` for a distribution over `k` outcomes; 0 when `k <= 1`
fn normalized_entropy(counts: &[u32]) -> f64 {
    let distinct = counts.iter().filter(|c| **c > 0).count();
    let total: u32 = counts.iter().sum();
    if distinct <= 1 || total == 0 {
        return 0.0;
    }

    let total = total as f64;
    let entropy: f64 = counts
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / total;
            -p * p.log2()
        })
        .sum();

    (entropy / (distinct as f64).log2()).clamp(0.0, 1.0)
}

/// Weighted reversal mass / weighted total mass, each transition weighted by
/// `exp(-λ·Δt)` with Δt in hours before the newest event
///
/// Falls back to the unweighted rate when every weight underflows to zero.
fn compute_recency_weighted_reversal_rate(
    graph: &TransitionGraph,
    decay_per_hour: f64,
    unweighted: f64,
) -> f64 {
    let Some(reference) = graph.last_event_at else {
        return 0.0;
    };
    if graph.steps.is_empty() {
        return 0.0;
    }

    let mut reversal_mass = 0.0;
    let mut total_mass = 0.0;
    for step in &graph.steps {
        let age_hours = (reference - step.at).num_milliseconds().max(0) as f64 / MILLIS_PER_HOUR;
        let weight = (-decay_per_hour * age_hours).exp();
        total_mass += weight;
        if step.reversal {
            reversal_mass += weight;
        }
    }

    if total_mass <= 0.0 || !total_mass.is_finite() {
        return unweighted;
    }

    (reversal_mass / total_mass).clamp(0.0, 1.0)
}
