//! Adapter for turning raw JSON into validated action events

use crate::error::EngineError;
use crate::ingest::raw_event::{RawActionEvent, ValidationError};
use crate::types::NewActionEvent;

/// Adapter for parsing and validating raw action events
pub struct RawActionAdapter;

impl RawActionAdapter {
    /// Parse a JSON string containing an array of RawActionEvents
    pub fn parse_array(json: &str) -> Result<Vec<RawActionEvent>, EngineError> {
        let events: Vec<RawActionEvent> = serde_json::from_str(json)?;
        Ok(events)
    }

    /// Parse NDJSON (newline-delimited JSON) containing RawActionEvents
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawActionEvent>, EngineError> {
        let mut events = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawActionEvent>(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => {
                    return Err(EngineError::Json(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(events)
    }

    /// Validate every event, failing on the first invalid one
    pub fn to_events(events: &[RawActionEvent]) -> Result<Vec<NewActionEvent>, EngineError> {
        events
            .iter()
            .enumerate()
            .map(|(idx, event)| {
                event
                    .validate()
                    .map_err(|e| EngineError::InvalidEvent(format!("event {idx}: {e}")))
            })
            .collect()
    }

    /// Validate a batch of events, returning only the failures
    pub fn validate_events(events: &[RawActionEvent]) -> Vec<ValidationResult> {
        events
            .iter()
            .enumerate()
            .filter_map(|(idx, event)| {
                event.validate().err().map(|error| ValidationResult {
                    index: idx,
                    user_id: event.user_id.to_string(),
                    error,
                })
            })
            .collect()
    }
}

/// A failed validation within a batch
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub index: usize,
    pub user_id: String,
    pub error: ValidationError,
}
