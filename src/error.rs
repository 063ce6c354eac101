//! Error types for the fragility engine

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while ingesting events or computing reports.
///
/// Payloads are plain strings so the error is `Clone`: callers coalesced onto
/// an in-flight computation all receive the leader's error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid period id: {0}")]
    InvalidPeriod(String),

    #[error("No report for user {user_id} in period {period_id}")]
    NotFound { user_id: String, period_id: String },

    #[error("Computation for user {user_id} in period {period_id} exceeded its {budget_ms}ms budget")]
    ComputationTimeout {
        user_id: String,
        period_id: String,
        budget_ms: u64,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store backend error: {0}")]
    StoreBackend(String),

    #[error("Computation task failed: {0}")]
    TaskFailed(String),

    #[error("Invalid JSON: {0}")]
    Json(String),
}

impl EngineError {
    /// Whether the caller may reasonably retry the same operation.
    ///
    /// The engine never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::StoreUnavailable(_) | EngineError::ComputationTimeout { .. }
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(_) => EngineError::StoreUnavailable(e.to_string()),
            StoreError::Backend(_) => EngineError::StoreBackend(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Json(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::StoreUnavailable("down".to_string()).is_retryable());
        assert!(EngineError::ComputationTimeout {
            user_id: "u".to_string(),
            period_id: "2024-01-15".to_string(),
            budget_ms: 10,
        }
        .is_retryable());
        assert!(!EngineError::InvalidConfig("bad".to_string()).is_retryable());
        assert!(!EngineError::NotFound {
            user_id: "u".to_string(),
            period_id: "p".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_store_error_maps_to_unavailable() {
        let err: EngineError = StoreError::Unavailable("connection refused".to_string()).into();
        assert!(matches!(err, EngineError::StoreUnavailable(_)));
        assert!(err.to_string().contains("connection refused"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_backend_error_is_not_retryable() {
        let err: EngineError = StoreError::Backend("lock poisoned".to_string()).into();
        assert!(matches!(err, EngineError::StoreBackend(_)));
        assert!(err.to_string().contains("lock poisoned"));
        assert!(!err.is_retryable());
    }
}
