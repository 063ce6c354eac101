//! In-memory store implementations
//!
//! Backed by std locks; suitable for tests, the CLI and single-process use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::store::{ActionLog, ReportStore, StoreError};
use crate::types::{
    ActionEvent, FragilityReport, NewActionEvent, ReportEntry, ReportKey, ReportState, TimeRange,
};

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// Action log held in process memory
#[derive(Debug, Default)]
pub struct InMemoryActionLog {
    events: RwLock<HashMap<String, Vec<ActionEvent>>>,
}

impl InMemoryActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events recorded for a user
    pub fn len_for_user(&self, user_id: &str) -> Result<usize, StoreError> {
        let events = self.events.read().map_err(poisoned)?;
        Ok(events.get(user_id).map_or(0, Vec::len))
    }
}

#[async_trait]
impl ActionLog for InMemoryActionLog {
    async fn append(&self, events: Vec<NewActionEvent>) -> Result<Vec<ActionEvent>, StoreError> {
        let mut log = self.events.write().map_err(poisoned)?;

        let mut recorded = Vec::with_capacity(events.len());
        for event in events {
            let user_events = log.entry(event.user_id.clone()).or_default();
            let sequence_no = user_events.last().map_or(1, |e| e.sequence_no + 1);
            let event = ActionEvent {
                user_id: event.user_id,
                action_type: event.action_type,
                timestamp: event.timestamp,
                sequence_no,
            };
            user_events.push(event.clone());
            recorded.push(event);
        }

        Ok(recorded)
    }

    async fn events_in_range(
        &self,
        user_id: &str,
        range: &TimeRange,
    ) -> Result<Vec<ActionEvent>, StoreError> {
        let log = self.events.read().map_err(poisoned)?;

        let mut selected: Vec<ActionEvent> = log
            .get(user_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| range.contains(e.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        selected.sort_by_key(|e| e.order_key());

        Ok(selected)
    }
}

/// Report store held in process memory
#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    entries: Mutex<HashMap<ReportKey, ReportEntry>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn empty_entry(key: &ReportKey, state: ReportState) -> ReportEntry {
    ReportEntry {
        key: key.clone(),
        state,
        report: None,
        last_error: None,
        newest_seen_sequence_no: None,
        stored_at: None,
        computation_id: None,
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn get(&self, key: &ReportKey) -> Result<Option<ReportEntry>, StoreError> {
        let entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn begin_computing(&self, key: &ReportKey) -> Result<ReportEntry, StoreError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| empty_entry(key, ReportState::Computing));
        entry.state = ReportState::Computing;
        Ok(entry.clone())
    }

    async fn upsert(
        &self,
        report: FragilityReport,
        computation_id: Uuid,
        stored_at: DateTime<Utc>,
    ) -> Result<ReportEntry, StoreError> {
        let key = report.key();
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| empty_entry(&key, ReportState::Computing));

        let watermark = report.last_sequence_no.unwrap_or(0);
        let seen_newer = entry
            .newest_seen_sequence_no
            .is_some_and(|seen| seen > watermark);

        entry.state = if seen_newer {
            ReportState::Stale
        } else {
            ReportState::Computed
        };
        entry.newest_seen_sequence_no = entry.newest_seen_sequence_no.max(report.last_sequence_no);
        entry.report = Some(report);
        entry.last_error = None;
        entry.stored_at = Some(stored_at);
        entry.computation_id = Some(computation_id);

        Ok(entry.clone())
    }

    async fn mark_failed(&self, key: &ReportKey, reason: &str) -> Result<ReportEntry, StoreError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| empty_entry(key, ReportState::Failed));
        entry.state = ReportState::Failed;
        entry.last_error = Some(reason.to_string());
        Ok(entry.clone())
    }

    async fn mark_stale_covering(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
        sequence_no: u64,
    ) -> Result<Vec<ReportKey>, StoreError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;

        let mut flipped = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if key.user_id != user_id {
                continue;
            }
            let covers = key
                .period_id
                .range()
                .map(|range| range.contains(at))
                .unwrap_or(false);
            if !covers {
                continue;
            }

            entry.newest_seen_sequence_no = entry.newest_seen_sequence_no.max(Some(sequence_no));

            let watermark = entry
                .report
                .as_ref()
                .and_then(|r| r.last_sequence_no)
                .unwrap_or(0);
            if entry.state == ReportState::Computed && sequence_no > watermark {
                entry.state = ReportState::Stale;
                flipped.push(key.clone());
            }
        }

        flipped.sort();
        Ok(flipped)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ReportEntry>, StoreError> {
        let entries = self.entries.lock().map_err(poisoned)?;
        let mut listed: Vec<ReportEntry> = entries
            .values()
            .filter(|e| e.key.user_id == user_id)
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::period::PeriodId;
    use crate::pipeline::score_period;
    use crate::types::ActionType;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn day() -> PeriodId {
        PeriodId::parse("2024-01-15").unwrap()
    }

    fn key() -> ReportKey {
        ReportKey::new("user-1", day())
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap()
    }

    fn report_for(events: &[ActionEvent]) -> FragilityReport {
        score_period("user-1", &day(), events, &EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_append_assigns_per_user_sequence_numbers() {
        let log = InMemoryActionLog::new();
        let recorded = log
            .append(vec![
                NewActionEvent::new("a", ActionType::Login, at(9)),
                NewActionEvent::new("b", ActionType::Login, at(9)),
                NewActionEvent::new("a", ActionType::Browse, at(8)),
            ])
            .await
            .unwrap();

        let seqs: Vec<(String, u64)> = recorded
            .iter()
            .map(|e| (e.user_id.clone(), e.sequence_no))
            .collect();
        assert_eq!(
            seqs,
            vec![("a".to_string(), 1), ("b".to_string(), 1), ("a".to_string(), 2)]
        );

        let more = log
            .append(vec![NewActionEvent::new("a", ActionType::Logout, at(10))])
            .await
            .unwrap();
        assert_eq!(more[0].sequence_no, 3);
        assert_eq!(log.len_for_user("a").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_events_in_range_are_ordered_and_filtered() {
        let log = InMemoryActionLog::new();
        log.append(vec![
            NewActionEvent::new("a", ActionType::Login, at(9)),
            NewActionEvent::new("a", ActionType::Browse, at(8)),
            NewActionEvent::new("a", ActionType::Logout, at(0) + Duration::days(1)),
        ])
        .await
        .unwrap();

        let events = log.events_in_range("a", &day().range().unwrap()).await.unwrap();
        let actions: Vec<ActionType> = events.iter().map(|e| e.action_type).collect();
        assert_eq!(actions, vec![ActionType::Browse, ActionType::Login]);

        let none = log.events_in_range("nobody", &day().range().unwrap()).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let store = InMemoryReportStore::new();
        assert!(store.get(&key()).await.unwrap().is_none());

        let entry = store.begin_computing(&key()).await.unwrap();
        assert_eq!(entry.state, ReportState::Computing);
        assert!(entry.report.is_none());

        let events = vec![ActionEvent {
            user_id: "user-1".to_string(),
            action_type: ActionType::Login,
            timestamp: at(9),
            sequence_no: 1,
        }];
        let entry = store
            .upsert(report_for(&events), Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        assert_eq!(entry.state, ReportState::Computed);

        // A newer event for the period flips the report to stale
        let flipped = store.mark_stale_covering("user-1", at(10), 2).await.unwrap();
        assert_eq!(flipped, vec![key()]);
        let entry = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(entry.state, ReportState::Stale);
        assert!(entry.report.is_some());

        store.begin_computing(&key()).await.unwrap();
        let entry = store.mark_failed(&key(), "timed out").await.unwrap();
        assert_eq!(entry.state, ReportState::Failed);
        assert_eq!(entry.last_error.as_deref(), Some("timed out"));
        assert!(entry.report.is_some());
    }

    #[tokio::test]
    async fn test_events_outside_period_or_already_included_do_not_stale() {
        let store = InMemoryReportStore::new();
        let events = vec![ActionEvent {
            user_id: "user-1".to_string(),
            action_type: ActionType::Login,
            timestamp: at(9),
            sequence_no: 4,
        }];
        store
            .upsert(report_for(&events), Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        // Next day
        let flipped = store
            .mark_stale_covering("user-1", at(9) + Duration::days(1), 5)
            .await
            .unwrap();
        assert!(flipped.is_empty());

        // Other user
        assert!(store.mark_stale_covering("user-2", at(9), 5).await.unwrap().is_empty());

        // Already part of the report
        assert!(store.mark_stale_covering("user-1", at(9), 4).await.unwrap().is_empty());

        let entry = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(entry.state, ReportState::Computed);
    }

    #[tokio::test]
    async fn test_upsert_lands_stale_when_newer_events_seen_during_compute() {
        let store = InMemoryReportStore::new();
        store.begin_computing(&key()).await.unwrap();

        // Event arrives while computing; nothing flips yet
        assert!(store.mark_stale_covering("user-1", at(11), 2).await.unwrap().is_empty());

        let events = vec![ActionEvent {
            user_id: "user-1".to_string(),
            action_type: ActionType::Login,
            timestamp: at(9),
            sequence_no: 1,
        }];
        let entry = store
            .upsert(report_for(&events), Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        assert_eq!(entry.state, ReportState::Stale);
        assert_eq!(entry.newest_seen_sequence_no, Some(2));
    }

    #[tokio::test]
    async fn test_upsert_replaces_instead_of_appending() {
        let store = InMemoryReportStore::new();
        let first_id = Uuid::new_v4();
        let second_id = Uuid::new_v4();
        store.upsert(report_for(&[]), first_id, Utc::now()).await.unwrap();
        store.upsert(report_for(&[]), second_id, Utc::now()).await.unwrap();

        let listed = store.list_for_user("user-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].computation_id, Some(second_id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_keep_sequence_unique() {
        let log = Arc::new(InMemoryActionLog::new());

        let mut handles = Vec::new();
        for i in 0..10 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                log.append(vec![NewActionEvent::new(
                    "a",
                    ActionType::Browse,
                    at(9) + Duration::minutes(i),
                )])
                .await
            }));
        }

        let mut seqs = Vec::new();
        for handle in handles {
            let recorded = handle.await.unwrap().unwrap();
            seqs.push(recorded[0].sequence_no);
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());
    }
}
