//! Raw action event schema
//!
//! Fields arrive as loosely typed JSON: user ids may be strings or integers,
//! action names and timestamps are plain strings. Nothing here is trusted
//! until [`RawActionEvent::validate`] succeeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{ActionType, NewActionEvent};

/// User identifier as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawUserId {
    Text(String),
    Number(i64),
}

impl fmt::Display for RawUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawUserId::Text(id) => f.write_str(id),
            RawUserId::Number(id) => write!(f, "{id}"),
        }
    }
}

/// An action event before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawActionEvent {
    pub user_id: RawUserId,
    /// snake_case action name (e.g. "add_to_cart")
    #[serde(alias = "action_type")]
    pub action: String,
    /// RFC 3339 timestamp
    #[serde(alias = "ts")]
    pub timestamp: String,
}

impl RawActionEvent {
    pub fn new(user_id: impl Into<String>, action: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            user_id: RawUserId::Text(user_id.into()),
            action: action.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Validate the event and convert it into a typed event
    pub fn validate(&self) -> Result<NewActionEvent, ValidationError> {
        let user_id = self.user_id.to_string();
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ValidationError::EmptyUserId);
        }

        let action_type = ActionType::parse(self.action.trim())
            .ok_or_else(|| ValidationError::UnknownAction(self.action.clone()))?;

        let timestamp = DateTime::parse_from_rfc3339(self.timestamp.trim())
            .map_err(|e| ValidationError::InvalidTimestamp {
                value: self.timestamp.clone(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(NewActionEvent::new(user_id, action_type, timestamp))
    }
}

/// Validation errors for raw action events
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("user_id must not be empty")]
    EmptyUserId,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid timestamp {value}: {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_validate_string_user_id() {
        let raw = RawActionEvent::new("user-7", "add_to_cart", "2024-01-15T09:30:00Z");
        let event = raw.validate().unwrap();

        assert_eq!(event.user_id, "user-7");
        assert_eq!(event.action_type, ActionType::AddToCart);
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_deserialize_integer_user_id_and_aliases() {
        let raw: RawActionEvent =
            serde_json::from_str(r#"{"user_id": 3, "action_type": "logout", "ts": "2024-01-15T10:00:00+02:00"}"#)
                .unwrap();
        let event = raw.validate().unwrap();

        assert_eq!(event.user_id, "3");
        assert_eq!(event.action_type, ActionType::Logout);
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_rejects_empty_user_id() {
        let raw = RawActionEvent::new("  ", "login", "2024-01-15T09:30:00Z");
        assert_eq!(raw.validate(), Err(ValidationError::EmptyUserId));
    }

    #[test]
    fn test_rejects_unknown_action() {
        let raw = RawActionEvent::new("u", "AddToCart", "2024-01-15T09:30:00Z");
        assert!(matches!(raw.validate(), Err(ValidationError::UnknownAction(a)) if a == "AddToCart"));
    }

    #[test]
    fn test_rejects_bad_timestamp() {
        let raw = RawActionEvent::new("u", "login", "yesterday");
        assert!(matches!(
            raw.validate(),
            Err(ValidationError::InvalidTimestamp { .. })
        ));

        // Timestamps without an offset are ambiguous
        let raw = RawActionEvent::new("u", "login", "2024-01-15T09:30:00");
        assert!(raw.validate().is_err());
    }
}
