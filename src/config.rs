//! Engine configuration
//!
//! Weights, decay constant, reversal rules, time budget, algorithm version and
//! period scheme travel together as one immutable value that is passed into
//! every computation.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::EngineError;
use crate::period::PeriodScheme;
use crate::types::ActionType;

/// Algorithm version tag stamped on every report
pub const ALGORITHM_VERSION: &str = "fragility-v1";

/// Default recency half-life in hours
pub const DEFAULT_HALF_LIFE_HOURS: f64 = 12.0;

/// Default per-computation time budget
pub const DEFAULT_TIME_BUDGET_MS: u64 = 5000;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// A `from -> to` transition that counts as undoing a prior commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalRule {
    pub from: ActionType,
    pub to: ActionType,
    /// When set, the transition only counts if this action occurs later in
    /// the same sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_followup: Option<ActionType>,
}

impl ReversalRule {
    pub fn new(from: ActionType, to: ActionType) -> Self {
        Self {
            from,
            to,
            requires_followup: None,
        }
    }

    pub fn with_followup(mut self, followup: ActionType) -> Self {
        self.requires_followup = Some(followup);
        self
    }
}

/// The default reversal set
pub fn default_reversal_rules() -> Vec<ReversalRule> {
    vec![
        ReversalRule::new(ActionType::Purchase, ActionType::Cancel),
        ReversalRule::new(ActionType::Purchase, ActionType::RefundRequest),
        ReversalRule::new(ActionType::AddToCart, ActionType::RemoveFromCart),
        ReversalRule::new(ActionType::RemoveFromCart, ActionType::AddToCart),
        ReversalRule::new(ActionType::Login, ActionType::Logout).with_followup(ActionType::Login),
    ]
}

/// Distribution the transition entropy is measured over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntropyBasis {
    /// Entropy of each action's successor distribution, normalized per action
    /// and weighted by how often the action is left
    #[default]
    Successor,
    /// Entropy of the distribution over all `(from, to)` pairs
    Pair,
}

/// Score component weights, summing to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub recency_weighted_reversal: f64,
    pub transition_entropy: f64,
    pub reversal: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            recency_weighted_reversal: 0.5,
            transition_entropy: 0.3,
            reversal: 0.2,
        }
    }
}

impl ScoreWeights {
    pub fn validate(&self) -> Result<(), EngineError> {
        let parts = [
            ("recency_weighted_reversal", self.recency_weighted_reversal),
            ("transition_entropy", self.transition_entropy),
            ("reversal", self.reversal),
        ];

        for (name, w) in parts {
            if !w.is_finite() || w < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "weight {name} must be a finite non-negative number, got {w}"
                )));
            }
        }

        let sum: f64 = parts.iter().map(|(_, w)| w).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::InvalidConfig(format!(
                "weights must sum to 1, got {sum}"
            )));
        }

        Ok(())
    }
}

/// Immutable configuration for one computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub weights: ScoreWeights,
    /// Recency decay constant λ, per hour
    pub decay_per_hour: f64,
    pub entropy_basis: EntropyBasis,
    pub reversal_rules: Vec<ReversalRule>,
    pub time_budget_ms: u64,
    pub algorithm_version: String,
    pub period_scheme: PeriodScheme,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            decay_per_hour: std::f64::consts::LN_2 / DEFAULT_HALF_LIFE_HOURS,
            entropy_basis: EntropyBasis::Successor,
            reversal_rules: default_reversal_rules(),
            time_budget_ms: DEFAULT_TIME_BUDGET_MS,
            algorithm_version: ALGORITHM_VERSION.to_string(),
            period_scheme: PeriodScheme::Daily,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set λ from a half-life: a transition `h` hours old weighs half as much
    pub fn with_half_life_hours(mut self, hours: f64) -> Self {
        self.decay_per_hour = std::f64::consts::LN_2 / hours;
        self
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_entropy_basis(mut self, basis: EntropyBasis) -> Self {
        self.entropy_basis = basis;
        self
    }

    pub fn with_reversal_rules(mut self, rules: Vec<ReversalRule>) -> Self {
        self.reversal_rules = rules;
        self
    }

    pub fn with_time_budget_ms(mut self, budget_ms: u64) -> Self {
        self.time_budget_ms = budget_ms;
        self
    }

    pub fn with_period_scheme(mut self, scheme: PeriodScheme) -> Self {
        self.period_scheme = scheme;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.weights.validate()?;

        if !self.decay_per_hour.is_finite() || self.decay_per_hour < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "decay_per_hour must be a finite non-negative number, got {}",
                self.decay_per_hour
            )));
        }

        if self.time_budget_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "time_budget_ms must be positive".to_string(),
            ));
        }

        if self.algorithm_version.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "algorithm_version must not be empty".to_string(),
            ));
        }

        self.period_scheme.validate()
    }

    /// Parse and validate a JSON configuration; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| EngineError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
