/// Entry point: one sync run over a list of keys
use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{validate_config, SyncConfig};
use crate::data::PersistenceStore;
use crate::error::{Result, SyncError};
use crate::source::DataSource;
use crate::sync::{FetchOrchestrator, SyncReport, WorkerPool};
use crate::types::Key;
use crate::utils::calendar::today_taipei;
use crate::utils::RetryExecutor;

pub struct SyncEngine {
    config: SyncConfig,
    source: Arc<dyn DataSource>,
    store: Arc<dyn PersistenceStore>,
    reference_date: Option<NaiveDate>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, source: Arc<dyn DataSource>, store: Arc<dyn PersistenceStore>) -> Self {
        SyncEngine {
            config,
            source,
            store,
            reference_date: None,
        }
    }

    /// Plan relative to `date` instead of today (backfills, tests)
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Sync every key. Only an invalid configuration or key list fails the
    /// whole run; everything else ends up in the per-key outcomes.
    pub async fn run_all(&self, keys: Vec<Key>, cancel: &CancellationToken) -> Result<SyncReport> {
        validate_config(&self.config)?;
        let keys = dedup_keys(keys)?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let reference_date = self.reference_date.unwrap_or_else(today_taipei);

        info!("🚀 Starting sync run {}", run_id);
        info!(
            "   Source: {}, keys: {}, lookback: {} months, reference: {}",
            self.source.name(),
            keys.len(),
            self.config.lookback_months,
            reference_date
        );
        info!(
            "   Workers: {}, rate limit: {}/min, retries: {}",
            self.config.max_concurrency, self.config.rate_limit_per_minute, self.config.max_retries
        );

        // One limiter per run, shared by every worker
        let limiter = Arc::new(self.config.rate_limiter());
        let retry = Arc::new(RetryExecutor::new(self.config.retry_policy(), limiter));

        let orchestrator = FetchOrchestrator::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            retry,
            self.config.planner(),
            self.config.calendar(),
            reference_date,
        )
        .with_period_pause(self.config.period_pause());

        let pool = WorkerPool::new(Arc::new(orchestrator), self.config.max_concurrency);
        let outcomes = pool.run(keys, cancel).await;

        let report = SyncReport::new(run_id, self.source.name(), reference_date, started_at, outcomes);

        if let Some(dir) = &self.config.report_dir {
            if let Err(e) = report.save(dir).await {
                warn!("⚠️  Failed to save sync report to {}: {}", dir.display(), e);
            }
        }

        report.log_summary();
        Ok(report)
    }
}

/// Drop blank and repeated keys, keeping first-seen order
fn dedup_keys(keys: Vec<Key>) -> Result<Vec<Key>> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(keys.len());

    for key in keys {
        if key.as_str().trim().is_empty() {
            warn!("⚠️  Ignoring blank key");
            continue;
        }
        if seen.insert(key.clone()) {
            unique.push(key);
        } else {
            warn!("⚠️  Duplicate key {} ignored", key);
        }
    }

    if unique.is_empty() {
        return Err(SyncError::Config("no keys to sync".to_string()));
    }
    Ok(unique)
}
