/// Per-key incremental sync: load, plan, fetch, merge, persist
use chrono::NaiveDate;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::data::{DatasetMerger, PeriodPlanner, PersistenceStore};
use crate::error::{Result, SyncError};
use crate::source::DataSource;
use crate::types::{FetchOutcome, Key, OutcomeStatus, Period, PeriodFailure};
use crate::utils::{CalendarNormalizer, RetryExecutor};

/// Lifecycle of one key's run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Loaded,
    Planning,
    Fetching(Period),
    Merging(Period),
    Persisted,
    Empty,
}

pub struct FetchOrchestrator {
    source: Arc<dyn DataSource>,
    store: Arc<dyn PersistenceStore>,
    retry: Arc<RetryExecutor>,
    planner: PeriodPlanner,
    calendar: CalendarNormalizer,
    reference_date: NaiveDate,
    period_pause: Duration,
}

impl FetchOrchestrator {
    pub fn new(
        source: Arc<dyn DataSource>,
        store: Arc<dyn PersistenceStore>,
        retry: Arc<RetryExecutor>,
        planner: PeriodPlanner,
        calendar: CalendarNormalizer,
        reference_date: NaiveDate,
    ) -> Self {
        FetchOrchestrator {
            source,
            store,
            retry,
            planner,
            calendar,
            reference_date,
            period_pause: Duration::ZERO,
        }
    }

    /// Jittered pause between consecutive periods of the same key
    pub fn with_period_pause(mut self, pause: Duration) -> Self {
        self.period_pause = pause;
        self
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    fn enter(&self, key: &Key, state: SyncState) {
        debug!("{} -> {:?}", key, state);
    }

    /// Bring `key` up to date. Terminal per-period failures are recorded in the
    /// outcome; non-retryable source errors and store errors abort the key.
    pub async fn run(&self, key: &Key, cancel: &CancellationToken) -> Result<FetchOutcome> {
        let mut outcome = FetchOutcome::new(key.clone());

        let mut dataset = self
            .store
            .load(key)
            .await
            .map_err(SyncError::into_persistence)?;
        self.enter(key, SyncState::Loaded);

        self.enter(key, SyncState::Planning);
        let (to_fetch, skipped) = self.planner.partition(self.reference_date, &dataset);
        outcome.skipped = skipped;

        if to_fetch.is_empty() {
            info!("✅ {} up to date ({} rows)", key, dataset.len());
            outcome.final_row_count = dataset.len();
            self.enter(key, SyncState::Empty);
            return Ok(outcome);
        }

        info!(
            "📊 {}: {} periods to fetch, {} already stored",
            key,
            to_fetch.len(),
            outcome.skipped.len()
        );

        for (idx, period) in to_fetch.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("⚠️  {} interrupted before {}", key, period);
                outcome.interrupted = true;
                break;
            }

            if idx > 0 && !self.period_pause.is_zero() {
                tokio::time::sleep(jittered(self.period_pause)).await;
            }

            self.enter(key, SyncState::Fetching(period));
            let fetched = self
                .retry
                .execute(key.as_str(), period, || self.source.fetch_period(key, period))
                .await;

            match fetched {
                Ok(raw) => {
                    self.enter(key, SyncState::Merging(period));
                    let batch = DatasetMerger::validate(raw, &self.calendar);
                    if batch.rejected > 0 {
                        debug!("{} {}: dropped {} invalid rows", key, period, batch.rejected);
                    }
                    outcome.rows_rejected += batch.rejected;
                    outcome.rows_merged += batch.rows.len();
                    if !batch.rows.is_empty() {
                        dataset = DatasetMerger::merge(&dataset, batch.rows);
                    }
                    outcome.fetched.push(period);
                }
                Err(SyncError::FetchFailed {
                    period,
                    attempts,
                    source,
                }) => {
                    warn!(
                        "⚠️  {} {} gave up after {} attempts: {}",
                        key, period, attempts, source
                    );
                    outcome.failed.push(PeriodFailure {
                        period,
                        attempts,
                        reason: source.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        outcome.final_row_count = dataset.len();

        if outcome.rows_merged == 0 {
            info!("{}: nothing new to store", key);
            self.enter(key, SyncState::Empty);
            return Ok(outcome);
        }

        self.store
            .save(key, &dataset)
            .await
            .map_err(SyncError::into_persistence)?;
        outcome.status = OutcomeStatus::Persisted;
        self.enter(key, SyncState::Persisted);

        info!(
            "💾 {}: merged {} rows ({} total, {} periods failed)",
            key,
            outcome.rows_merged,
            outcome.final_row_count,
            outcome.failed.len()
        );

        Ok(outcome)
    }
}

/// Scale `base` by a random factor in [0.5, 1.5]
fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..=1.5);
    base.mul_f64(factor)
}
