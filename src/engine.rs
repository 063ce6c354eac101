//! Fragility engine
//!
//! Ties the action log, the scoring pipeline and the report store together.
//!
//! For one `(user, period)` key at most one computation runs at a time.
//! Concurrent triggers with an equal configuration share the running
//! computation's result; triggers with a different configuration wait for it
//! to finish and then run their own. Computations run on spawned tasks, so a
//! caller that stops waiting cancels nothing.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::explorer::SequenceExplorer;
use crate::graph::TransitionGraphBuilder;
use crate::ingest::{RawActionAdapter, RawActionEvent};
use crate::period::PeriodId;
use crate::pipeline::score_range;
use crate::store::{ActionLog, InMemoryActionLog, InMemoryReportStore, ReportStore};
use crate::types::{
    ActionEvent, AnnotatedEvent, FragilityReport, NewActionEvent, ReportEntry, ReportKey,
    StoredReport, TimeRange, TransitionGraph,
};

type ComputeResult = Result<FragilityReport, EngineError>;
type ResultReceiver = watch::Receiver<Option<ComputeResult>>;

/// A running computation for one key
struct InFlight {
    config: Arc<EngineConfig>,
    result: ResultReceiver,
}

enum Claim {
    /// This caller started the computation
    Leader(ResultReceiver),
    /// Same configuration already running; share its result
    Follower(ResultReceiver),
    /// Different configuration running; wait, then try again
    Busy(ResultReceiver),
}

struct EngineInner {
    log: Arc<dyn ActionLog>,
    reports: Arc<dyn ReportStore>,
    in_flight: Mutex<HashMap<ReportKey, InFlight>>,
}

/// Handle to the fragility engine; cheap to clone
#[derive(Clone)]
pub struct FragilityEngine {
    inner: Arc<EngineInner>,
}

impl FragilityEngine {
    pub fn new(log: Arc<dyn ActionLog>, reports: Arc<dyn ReportStore>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                log,
                reports,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Engine backed by in-memory stores
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryActionLog::new()),
            Arc::new(InMemoryReportStore::new()),
        )
    }

    /// Append events to the action log and mark every computed report whose
    /// period covers one of them as stale.
    ///
    /// Errors only when nothing was appended. A stale-marking failure after
    /// the append is logged and the recorded events are still returned.
    pub async fn ingest(&self, events: Vec<NewActionEvent>) -> Result<Vec<ActionEvent>, EngineError> {
        if let Some(idx) = events.iter().position(|e| e.user_id.trim().is_empty()) {
            return Err(EngineError::InvalidEvent(format!(
                "event {idx}: user_id must not be empty"
            )));
        }
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let recorded = self.inner.log.append(events).await?;

        // The batch is in the log now; failing here would invite a duplicate append
        let mut stale = Vec::new();
        for event in &recorded {
            match self
                .inner
                .reports
                .mark_stale_covering(&event.user_id, event.timestamp, event.sequence_no)
                .await
            {
                Ok(flipped) => stale.extend(flipped),
                Err(e) => {
                    warn!(
                        user_id = %event.user_id,
                        sequence_no = event.sequence_no,
                        error = %e,
                        "could not mark covering reports stale"
                    );
                    break;
                }
            }
        }

        for key in &stale {
            debug!(user_id = %key.user_id, period_id = %key.period_id, "report marked stale");
        }
        info!(events = recorded.len(), stale_reports = stale.len(), "events ingested");

        Ok(recorded)
    }

    /// Validate raw events and ingest them; an invalid event rejects the batch
    pub async fn ingest_raw(&self, events: &[RawActionEvent]) -> Result<Vec<ActionEvent>, EngineError> {
        let events = RawActionAdapter::to_events(events)?;
        self.ingest(events).await
    }

    /// Compute, persist and return the report for `(user_id, period_id)`.
    ///
    /// Idempotent: identical events, configuration and algorithm version give
    /// an identical report.
    pub async fn compute(
        &self,
        user_id: &str,
        period_id: &PeriodId,
        config: &EngineConfig,
    ) -> Result<FragilityReport, EngineError> {
        config.validate()?;
        if user_id.trim().is_empty() {
            return Err(EngineError::InvalidEvent("user_id must not be empty".to_string()));
        }
        let range = period_id.range()?;
        let key = ReportKey::new(user_id, period_id.clone());
        let config = Arc::new(config.clone());

        loop {
            match self.claim(&key, range, &config) {
                Claim::Leader(rx) => return await_result(rx).await,
                Claim::Follower(rx) => {
                    debug!(user_id = %key.user_id, period_id = %key.period_id, "joining in-flight computation");
                    return await_result(rx).await;
                }
                Claim::Busy(mut rx) => {
                    debug!(
                        user_id = %key.user_id,
                        period_id = %key.period_id,
                        "waiting for in-flight computation with a different configuration"
                    );
                    let _ = rx.wait_for(Option::is_some).await;
                }
            }
        }
    }

    /// The stored report for a key, with its lifecycle state
    pub async fn get_report(&self, user_id: &str, period_id: &PeriodId) -> Result<StoredReport, EngineError> {
        let key = ReportKey::new(user_id, period_id.clone());
        self.inner
            .reports
            .get(&key)
            .await?
            .and_then(StoredReport::from_entry)
            .ok_or_else(|| EngineError::NotFound {
                user_id: user_id.to_string(),
                period_id: period_id.to_string(),
            })
    }

    /// The raw store entry for a key; `None` is the `NONE` state
    pub async fn get_entry(&self, user_id: &str, period_id: &PeriodId) -> Result<Option<ReportEntry>, EngineError> {
        let key = ReportKey::new(user_id, period_id.clone());
        Ok(self.inner.reports.get(&key).await?)
    }

    /// Every stored report of a user, ordered by period start
    pub async fn list_reports(&self, user_id: &str) -> Result<Vec<StoredReport>, EngineError> {
        let mut reports: Vec<StoredReport> = self
            .inner
            .reports
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter_map(StoredReport::from_entry)
            .collect();
        reports.sort_by(|a, b| {
            (a.report.period_start, &a.report.period_id).cmp(&(b.report.period_start, &b.report.period_id))
        });
        Ok(reports)
    }

    /// Transition graph of a period under the config's reversal rules
    pub async fn get_transitions(
        &self,
        user_id: &str,
        period_id: &PeriodId,
        config: &EngineConfig,
    ) -> Result<TransitionGraph, EngineError> {
        let range = period_id.range()?;
        let events = self.inner.log.events_in_range(user_id, &range).await?;
        Ok(TransitionGraphBuilder::build(&events, &config.reversal_rules))
    }

    /// Ordered raw events in `range`, annotated with incoming transitions.
    ///
    /// Reversal flags come from the full period each event belongs to under
    /// the config's period scheme, so they match what that period scored.
    pub async fn explore_sequence(
        &self,
        user_id: &str,
        range: TimeRange,
        config: &EngineConfig,
    ) -> Result<Vec<AnnotatedEvent>, EngineError> {
        config.validate()?;
        let events = self.inner.log.events_in_range(user_id, &range).await?;

        let mut periods = BTreeSet::new();
        for event in &events {
            periods.insert(config.period_scheme.period_for(event.timestamp)?);
        }

        let mut graphs = Vec::with_capacity(periods.len());
        for period_id in &periods {
            let period_events = self
                .inner
                .log
                .events_in_range(user_id, &period_id.range()?)
                .await?;
            graphs.push(TransitionGraphBuilder::build(&period_events, &config.reversal_rules));
        }

        let flags = SequenceExplorer::reversal_flags(&graphs);
        Ok(SequenceExplorer::annotate_with_flags(&events, &flags))
    }

    fn claim(&self, key: &ReportKey, range: TimeRange, config: &Arc<EngineConfig>) -> Claim {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(running) = in_flight.get(key) {
            return if *running.config == **config {
                Claim::Follower(running.result.clone())
            } else {
                Claim::Busy(running.result.clone())
            };
        }

        let (tx, rx) = watch::channel(None);
        in_flight.insert(
            key.clone(),
            InFlight {
                config: Arc::clone(config),
                result: rx.clone(),
            },
        );

        let guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
        };
        let config = Arc::clone(config);
        tokio::spawn(async move {
            let result = guard.inner.run(&guard.key, range, &config).await;
            // Release the key before publishing so a woken waiter can claim it
            drop(guard);
            let _ = tx.send(Some(result));
        });

        Claim::Leader(rx)
    }
}

impl EngineInner {
    async fn run(&self, key: &ReportKey, range: TimeRange, config: &Arc<EngineConfig>) -> ComputeResult {
        let computation_id = Uuid::new_v4();
        debug!(
            user_id = %key.user_id,
            period_id = %key.period_id,
            %computation_id,
            "computation started"
        );

        self.reports.begin_computing(key).await?;

        let budget_ms = config.time_budget_ms;
        let work = self.score(key, range, config);
        let outcome = match tokio::time::timeout(Duration::from_millis(budget_ms), work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::ComputationTimeout {
                user_id: key.user_id.clone(),
                period_id: key.period_id.to_string(),
                budget_ms,
            }),
        };

        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    user_id = %key.user_id,
                    period_id = %key.period_id,
                    %computation_id,
                    error = %e,
                    "computation failed"
                );
                if let Err(store_err) = self.reports.mark_failed(key, &e.to_string()).await {
                    warn!(error = %store_err, "could not record failure");
                }
                return Err(e);
            }
        };

        let entry = self.reports.upsert(report.clone(), computation_id, Utc::now()).await?;
        info!(
            user_id = %key.user_id,
            period_id = %key.period_id,
            %computation_id,
            score = report.score,
            classification = %report.classification,
            events = report.input_event_count,
            stale = entry.is_stale(),
            "report computed"
        );

        Ok(report)
    }

    async fn score(&self, key: &ReportKey, range: TimeRange, config: &Arc<EngineConfig>) -> ComputeResult {
        let events = self.log.events_in_range(&key.user_id, &range).await?;

        let key = key.clone();
        let config = Arc::clone(config);
        tokio::task::spawn_blocking(move || {
            score_range(&key.user_id, &key.period_id, range, &events, &config)
        })
        .await
        .map_err(|e| EngineError::TaskFailed(e.to_string()))
    }
}

/// Removes a key from the in-flight table when its computation ends, even by
/// panic
struct InFlightGuard {
    inner: Arc<EngineInner>,
    key: ReportKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

async fn await_result(mut rx: ResultReceiver) -> ComputeResult {
    let published = match rx.wait_for(Option::is_some).await {
        Ok(value) => value.clone(),
        Err(_) => None,
    };
    published.unwrap_or_else(|| {
        Err(EngineError::TaskFailed(
            "computation ended without a result".to_string(),
        ))
    })
}
