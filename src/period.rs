//! Scoring periods
//!
//! A period is a half-open time window of one user's events. Period ids are
//! self-describing so the time range can always be recovered from the id:
//!
//! - calendar day (UTC): `2024-01-15`
//! - fixed-length window aligned to the Unix epoch: `2024-01-15T14:00:00Z/PT3600S`

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;
use crate::types::TimeRange;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Longest allowed window: one leap year
const MAX_WINDOW_SECONDS: u64 = 366 * 86_400;

/// How timestamps are grouped into periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeriodScheme {
    /// One UTC calendar day per period
    #[default]
    Daily,
    /// Tumbling windows of a fixed number of seconds, aligned to the Unix epoch
    Window { seconds: u64 },
}

impl PeriodScheme {
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            PeriodScheme::Daily => Ok(()),
            PeriodScheme::Window { seconds: 0 } => Err(EngineError::InvalidConfig(
                "period window length must be positive".to_string(),
            )),
            PeriodScheme::Window { seconds } if *seconds > MAX_WINDOW_SECONDS => Err(
                EngineError::InvalidConfig(format!("period window of {seconds}s is too long")),
            ),
            PeriodScheme::Window { .. } => Ok(()),
        }
    }

    /// The period containing `at`
    pub fn period_for(&self, at: DateTime<Utc>) -> Result<PeriodId, EngineError> {
        match *self {
            PeriodScheme::Daily => Ok(PeriodId(at.date_naive().format(DAY_FORMAT).to_string())),
            PeriodScheme::Window { seconds } => {
                self.validate()?;
                let len = seconds as i64;
                let start_secs = at.timestamp().div_euclid(len) * len;
                let start = Utc.timestamp_opt(start_secs, 0).single().ok_or_else(|| {
                    EngineError::InvalidPeriod(format!("window start out of range for {at}"))
                })?;
                Ok(PeriodId(format_window(start, seconds)))
            }
        }
    }
}

/// Canonical identifier of a scoring period
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeriodId(String);

impl PeriodId {
    /// Parse and canonicalize a period id
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let raw = raw.trim();
        match raw.split_once('/') {
            None => {
                let date = NaiveDate::parse_from_str(raw, DAY_FORMAT)
                    .map_err(|e| EngineError::InvalidPeriod(format!("{raw}: {e}")))?;
                Ok(PeriodId(date.format(DAY_FORMAT).to_string()))
            }
            Some((start, length)) => {
                let (start, seconds) = parse_window(raw, start, length)?;
                Ok(PeriodId(format_window(start, seconds)))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The half-open time range covered by this period
    pub fn range(&self) -> Result<TimeRange, EngineError> {
        let invalid = || EngineError::InvalidPeriod(self.0.clone());
        match self.0.split_once('/') {
            None => {
                let date = NaiveDate::parse_from_str(&self.0, DAY_FORMAT).map_err(|_| invalid())?;
                let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
                let start = Utc.from_utc_datetime(&midnight);
                let end = start.checked_add_signed(Duration::days(1)).ok_or_else(invalid)?;
                TimeRange::new(start, end).ok_or_else(invalid)
            }
            Some((start, length)) => {
                let (start, seconds) = parse_window(&self.0, start, length)?;
                let end = start
                    .checked_add_signed(Duration::seconds(seconds as i64))
                    .ok_or_else(invalid)?;
                TimeRange::new(start, end).ok_or_else(invalid)
            }
        }
    }
}

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PeriodId {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PeriodId::parse(&value)
    }
}

impl From<PeriodId> for String {
    fn from(id: PeriodId) -> Self {
        id.0
    }
}

fn format_window(start: DateTime<Utc>, seconds: u64) -> String {
    format!(
        "{}/PT{}S",
        start.to_rfc3339_opts(SecondsFormat::Secs, true),
        seconds
    )
}

fn parse_window(raw: &str, start: &str, length: &str) -> Result<(DateTime<Utc>, u64), EngineError> {
    let start = DateTime::parse_from_rfc3339(start)
        .map_err(|e| EngineError::InvalidPeriod(format!("{raw}: {e}")))?
        .with_timezone(&Utc);

    let seconds: u64 = length
        .strip_prefix("PT")
        .and_then(|s| s.strip_suffix('S'))
        .and_then(|s| s.parse().ok())
        .filter(|s| *s > 0 && *s <= MAX_WINDOW_SECONDS)
        .ok_or_else(|| {
            EngineError::InvalidPeriod(format!("{raw}: window length must look like PT<seconds>S"))
        })?;

    if start.timestamp_subsec_nanos() != 0 || start.timestamp().rem_euclid(seconds as i64) != 0 {
        return Err(EngineError::InvalidPeriod(format!(
            "{raw}: window start is not aligned to a {seconds}s boundary"
        )));
    }

    Ok((start, seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_daily_period_for_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 23, 59, 59).unwrap();
        let id = PeriodScheme::Daily.period_for(at).unwrap();
        assert_eq!(id.as_str(), "2024-01-15");

        let range = id.range().unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap());
        assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap());
        assert!(range.contains(at));
    }

    #[test]
    fn test_window_period_for_timestamp() {
        let scheme = PeriodScheme::Window { seconds: 3600 };
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 25, 10).unwrap();
        let id = scheme.period_for(at).unwrap();
        assert_eq!(id.as_str(), "2024-01-15T14:00:00Z/PT3600S");

        let range = id.range().unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap());
        assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_window_before_epoch_rounds_down() {
        let scheme = PeriodScheme::Window { seconds: 3600 };
        let at = Utc.with_ymd_and_hms(1969, 12, 31, 23, 30, 0).unwrap();
        let id = scheme.period_for(at).unwrap();
        assert_eq!(id.as_str(), "1969-12-31T23:00:00Z/PT3600S");
    }

    #[test]
    fn test_parse_canonicalizes_offsets() {
        let id = PeriodId::parse("2024-01-15T15:00:00+01:00/PT3600S").unwrap();
        assert_eq!(id.as_str(), "2024-01-15T14:00:00Z/PT3600S");
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        assert!(PeriodId::parse("yesterday").is_err());
        assert!(PeriodId::parse("2024-13-01").is_err());
        assert!(PeriodId::parse("2024-01-15T14:00:00Z/PT0S").is_err());
        assert!(PeriodId::parse("2024-01-15T14:00:00Z/3600").is_err());
        // Not aligned to the window length
        assert!(PeriodId::parse("2024-01-15T14:10:00Z/PT3600S").is_err());
    }

    #[test]
    fn test_period_id_serde_validates() {
        let id: PeriodId = serde_json::from_str("\"2024-01-15\"").unwrap();
        assert_eq!(id.as_str(), "2024-01-15");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"2024-01-15\"");
        assert!(serde_json::from_str::<PeriodId>("\"not-a-period\"").is_err());
    }

    #[test]
    fn test_zero_window_is_invalid_config() {
        let scheme = PeriodScheme::Window { seconds: 0 };
        assert!(matches!(scheme.validate(), Err(EngineError::InvalidConfig(_))));
        assert!(scheme.period_for(Utc::now()).is_err());

        let too_long = PeriodScheme::Window { seconds: MAX_WINDOW_SECONDS + 1 };
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn test_scheme_serialization() {
        let json = serde_json::to_string(&PeriodScheme::Window { seconds: 900 }).unwrap();
        assert_eq!(json, r#"{"kind":"window","seconds":900}"#);
        let daily: PeriodScheme = serde_json::from_str(r#"{"kind":"daily"}"#).unwrap();
        assert_eq!(daily, PeriodScheme::Daily);
    }
}
