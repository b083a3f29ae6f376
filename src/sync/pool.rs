/// Bounded-concurrency execution of per-key syncs
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::sync::FetchOrchestrator;
use crate::types::{FetchOutcome, Key};

pub struct WorkerPool {
    orchestrator: Arc<FetchOrchestrator>,
    max_concurrency: usize,
}

impl WorkerPool {
    pub fn new(orchestrator: Arc<FetchOrchestrator>, max_concurrency: usize) -> Self {
        WorkerPool {
            orchestrator,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every key with at most `max_concurrency` in flight. Always yields
    /// one outcome per distinct key: errors and panics become `Failed`, keys
    /// still queued at cancellation become `Cancelled`.
    pub async fn run(&self, keys: Vec<Key>, cancel: &CancellationToken) -> HashMap<Key, FetchOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let total = keys.len();
        let mut tasks = JoinSet::new();

        for key in keys.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let orchestrator = Arc::clone(&self.orchestrator);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return FetchOutcome::cancelled(key);
                };
                if cancel.is_cancelled() {
                    return FetchOutcome::cancelled(key);
                }

                match AssertUnwindSafe(orchestrator.run(&key, &cancel)).catch_unwind().await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => {
                        error!("❌ {} aborted ({}): {}", key, e.error_code(), e);
                        FetchOutcome::failed(key, e.to_string())
                    }
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        error!("❌ {} panicked: {}", key, reason);
                        FetchOutcome::failed(key, format!("panic: {}", reason))
                    }
                }
            });
        }

        let mut outcomes = HashMap::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    info!(
                        "[{}/{}] {} finished: {:?}",
                        outcomes.len() + 1,
                        total,
                        outcome.key,
                        outcome.status
                    );
                    outcomes.insert(outcome.key.clone(), outcome);
                }
                Err(e) => error!("❌ Worker task failed: {}", e),
            }
        }

        // A task lost to the runtime still gets an outcome
        for key in keys {
            outcomes
                .entry(key.clone())
                .or_insert_with(|| FetchOutcome::failed(key, "worker task aborted"));
        }

        outcomes
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, MemoryStore, PeriodPlanner, PersistenceStore};
    use crate::error::{Result, SyncError};
    use crate::source::DataSource;
    use crate::types::{Field, OutcomeStatus, Period, RawRow};
    use crate::utils::{CalendarNormalizer, RateLimiter, RetryExecutor, RetryPolicy};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks peak concurrency; key "panic" panics, key "bad" is rejected
    #[derive(Default)]
    struct CountingSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl DataSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        async fn fetch_period(&self, key: &Key, period: Period) -> Result<Vec<RawRow>> {
            match key.as_str() {
                "panic" => panic!("malformed upstream payload"),
                "bad" => return Err(SyncError::Rejected("no such key".to_string())),
                _ => {}
            }

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let day = format!("{}/{:02}/01", period.year - 1911, period.month);
            Ok(vec![RawRow::offset(day).cell(Field::Close, "10")])
        }
    }

    fn pool(source: Arc<CountingSource>, store: Arc<dyn PersistenceStore>, workers: usize) -> WorkerPool {
        let retry = Arc::new(RetryExecutor::new(
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                backoff_factor: 1.0,
            },
            Arc::new(RateLimiter::new(1_000, 1_000.0)),
        ));
        let orchestrator = FetchOrchestrator::new(
            source,
            store,
            retry,
            PeriodPlanner::new(1, 0),
            CalendarNormalizer::default(),
            NaiveDate::from_ymd_opt(2025, 8, 20).unwrap(),
        );
        WorkerPool::new(Arc::new(orchestrator), workers)
    }

    /// Memory store whose writes for key "locked" fail
    struct ReadOnlyForLocked {
        inner: MemoryStore,
    }

    #[async_trait]
    impl PersistenceStore for ReadOnlyForLocked {
        async fn load(&self, key: &Key) -> Result<Dataset> {
            self.inner.load(key).await
        }

        async fn save(&self, key: &Key, dataset: &Dataset) -> Result<()> {
            if key.as_str() == "locked" {
                return Err(SyncError::Persistence("disk full".to_string()));
            }
            self.inner.save(key, dataset).await
        }
    }

    fn keys(codes: &[&str]) -> Vec<Key> {
        codes.iter().map(|c| Key::new(*c)).collect()
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let source = Arc::new(CountingSource::default());
        let store = Arc::new(MemoryStore::new());
        let pool = pool(source.clone(), store, 2);

        let outcomes = pool
            .run(keys(&["1101", "1102", "2330", "2317", "2454", "3008"]), &CancellationToken::new())
            .await;

        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.values().all(|o| o.status == OutcomeStatus::Persisted));
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_and_error_are_isolated() {
        let source = Arc::new(CountingSource::default());
        let store = Arc::new(MemoryStore::new());
        let pool = pool(source, store.clone(), 2);

        let outcomes = pool
            .run(keys(&["2330", "panic", "bad", "2317"]), &CancellationToken::new())
            .await;

        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[&Key::new("2330")].status, OutcomeStatus::Persisted);
        assert_eq!(outcomes[&Key::new("2317")].status, OutcomeStatus::Persisted);
        match &outcomes[&Key::new("panic")].status {
            OutcomeStatus::Failed(reason) => assert!(reason.contains("malformed upstream payload")),
            other => panic!("unexpected status {:?}", other),
        }
        assert!(matches!(outcomes[&Key::new("bad")].status, OutcomeStatus::Failed(_)));
        assert_eq!(store.save_count(&Key::new("2330")).await, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() {
        let source = Arc::new(CountingSource::default());
        let store = Arc::new(MemoryStore::new());
        let pool = pool(source.clone(), store.clone(), 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = pool.run(keys(&["2330", "2317", "1101"]), &cancel).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.values().all(|o| o.status == OutcomeStatus::Cancelled && o.interrupted));
        assert_eq!(source.peak.load(Ordering::SeqCst), 0);
        assert_eq!(store.save_count(&Key::new("2330")).await, 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_isolated_to_its_key() {
        let source = Arc::new(CountingSource::default());
        let store = Arc::new(ReadOnlyForLocked { inner: MemoryStore::new() });
        let pool = pool(source, store.clone(), 2);

        let outcomes = pool.run(keys(&["2330", "locked"]), &CancellationToken::new()).await;

        assert_eq!(outcomes.len(), 2);
        match &outcomes[&Key::new("locked")].status {
            OutcomeStatus::Failed(reason) => assert!(reason.contains("disk full")),
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(outcomes[&Key::new("2330")].status, OutcomeStatus::Persisted);
        assert_eq!(store.inner.save_count(&Key::new("2330")).await, 1);
        assert_eq!(store.inner.save_count(&Key::new("locked")).await, 0);
    }
}
