//! Fragility scoring
//!
//! Combines volatility metrics into one bounded score and maps the score to a
//! volatility class through a single ordered boundary table.

use crate::config::ScoreWeights;
use crate::types::{Classification, VolatilityMetrics};

/// Upper edge of a classification band
#[derive(Debug, Clone, Copy)]
enum UpperBound {
    /// score < bound
    Below(f64),
    /// score <= bound
    AtMost(f64),
    Unbounded,
}

impl UpperBound {
    fn admits(&self, score: f64) -> bool {
        match *self {
            UpperBound::Below(bound) => score < bound,
            UpperBound::AtMost(bound) => score <= bound,
            UpperBound::Unbounded => true,
        }
    }
}

/// Bands in ascending order; the first band admitting the score wins
const CLASSIFICATION_BANDS: [(UpperBound, Classification); 3] = [
    (UpperBound::Below(0.20), Classification::Low),
    (UpperBound::AtMost(0.50), Classification::Medium),
    (UpperBound::Unbounded, Classification::High),
];

/// Fragility scorer
pub struct FragilityScorer;

impl FragilityScorer {
    /// Weighted combination of the metrics, clamped to [0, 1]
    pub fn score(metrics: &VolatilityMetrics, weights: &ScoreWeights) -> f64 {
        clamp01(
            weights.recency_weighted_reversal * metrics.recency_weighted_reversal_rate
                + weights.transition_entropy * metrics.transition_entropy
                + weights.reversal * metrics.reversal_rate,
        )
    }

    /// Map a score to its class
    pub fn classify(score: f64) -> Classification {
        let score = clamp01(score);
        CLASSIFICATION_BANDS
            .iter()
            .find(|(bound, _)| bound.admits(score))
            .map(|(_, class)| *class)
            .unwrap_or(Classification::High)
    }
}

/// Clamp to [0, 1]; NaN becomes 0
pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(rwrr: f64, entropy: f64, rr: f64) -> VolatilityMetrics {
        VolatilityMetrics {
            recency_weighted_reversal_rate: rwrr,
            transition_entropy: entropy,
            reversal_rate: rr,
            ..Default::default()
        }
    }

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(FragilityScorer::classify(0.0), Classification::Low);
        assert_eq!(FragilityScorer::classify(0.1999), Classification::Low);
        assert_eq!(FragilityScorer::classify(0.20), Classification::Medium);
        assert_eq!(FragilityScorer::classify(0.35), Classification::Medium);
        assert_eq!(FragilityScorer::classify(0.50), Classification::Medium);
        assert_eq!(FragilityScorer::classify(0.5001), Classification::High);
        assert_eq!(FragilityScorer::classify(1.0), Classification::High);
    }

    #[test]
    fn test_classification_of_out_of_range_values() {
        assert_eq!(FragilityScorer::classify(f64::NAN), Classification::Low);
        assert_eq!(FragilityScorer::classify(-3.0), Classification::Low);
        assert_eq!(FragilityScorer::classify(7.0), Classification::High);
    }

    #[test]
    fn test_default_weighting() {
        let weights = ScoreWeights::default();
        let score = FragilityScorer::score(&metrics(1.0, 0.0, 0.0), &weights);
        assert!((score - 0.5).abs() < 1e-12);

        let score = FragilityScorer::score(&metrics(0.0, 1.0, 0.0), &weights);
        assert!((score - 0.3).abs() < 1e-12);

        let score = FragilityScorer::score(&metrics(0.0, 0.0, 1.0), &weights);
        assert!((score - 0.2).abs() < 1e-12);

        let score = FragilityScorer::score(&metrics(1.0, 1.0, 1.0), &weights);
        assert!(score <= 1.0);
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_score_is_clamped() {
        let weights = ScoreWeights::default();
        assert_eq!(FragilityScorer::score(&metrics(f64::NAN, 0.0, 0.0), &weights), 0.0);
        assert_eq!(FragilityScorer::score(&metrics(5.0, 5.0, 5.0), &weights), 1.0);
        assert_eq!(FragilityScorer::score(&metrics(-1.0, 0.0, 0.0), &weights), 0.0);
    }

    #[test]
    fn test_clamp01() {
        assert_eq!(clamp01(f64::NAN), 0.0);
        assert_eq!(clamp01(f64::INFINITY), 1.0);
        assert_eq!(clamp01(f64::NEG_INFINITY), 0.0);
        assert_eq!(clamp01(0.42), 0.42);
    }
}
