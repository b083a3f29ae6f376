/// Run-level summary of a sync over many keys
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{FetchOutcome, Key, OutcomeStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncTotals {
    pub keys: usize,
    pub persisted: usize,
    pub empty: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub interrupted: usize,
    pub periods_fetched: usize,
    pub periods_skipped: usize,
    pub periods_failed: usize,
    pub rows_merged: usize,
    pub rows_rejected: usize,
}

impl SyncTotals {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a FetchOutcome>) -> Self {
        outcomes.into_iter().fold(SyncTotals::default(), |mut t, o| {
            t.keys += 1;
            match o.status {
                OutcomeStatus::Persisted => t.persisted += 1,
                OutcomeStatus::Empty => t.empty += 1,
                OutcomeStatus::Failed(_) => t.failed += 1,
                OutcomeStatus::Cancelled => t.cancelled += 1,
            }
            if o.interrupted {
                t.interrupted += 1;
            }
            t.periods_fetched += o.fetched.len();
            t.periods_skipped += o.skipped.len();
            t.periods_failed += o.failed.len();
            t.rows_merged += o.rows_merged;
            t.rows_rejected += o.rows_rejected;
            t
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub source: String,
    pub reference_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_sec: i64,
    pub outcomes: BTreeMap<Key, FetchOutcome>,
    pub totals: SyncTotals,
    /// Share of keys that ended Persisted or Empty, in percent
    pub success_rate: f64,
}

impl SyncReport {
    pub fn new(
        run_id: Uuid,
        source: impl Into<String>,
        reference_date: NaiveDate,
        started_at: DateTime<Utc>,
        outcomes: HashMap<Key, FetchOutcome>,
    ) -> Self {
        let finished_at = Utc::now();
        let outcomes: BTreeMap<Key, FetchOutcome> = outcomes.into_iter().collect();
        let totals = SyncTotals::from_outcomes(outcomes.values());

        let succeeded = outcomes.values().filter(|o| o.is_success()).count();
        let success_rate = if totals.keys > 0 {
            (succeeded as f64 / totals.keys as f64) * 100.0
        } else {
            0.0
        };

        SyncReport {
            run_id,
            source: source.into(),
            reference_date,
            started_at,
            finished_at,
            duration_sec: (finished_at - started_at).num_seconds(),
            outcomes,
            totals,
            success_rate,
        }
    }

    pub fn outcome(&self, key: &Key) -> Option<&FetchOutcome> {
        self.outcomes.get(key)
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.values().all(FetchOutcome::is_success)
    }

    pub fn log_summary(&self) {
        info!("✅ Sync run {} complete ({})", self.run_id, self.source);
        info!("   Duration: {}s", self.duration_sec);
        info!(
            "   Keys: {} persisted, {} empty, {} failed, {} cancelled ({} interrupted)",
            self.totals.persisted,
            self.totals.empty,
            self.totals.failed,
            self.totals.cancelled,
            self.totals.interrupted
        );
        info!(
            "   Periods: {} fetched, {} skipped, {} failed",
            self.totals.periods_fetched, self.totals.periods_skipped, self.totals.periods_failed
        );
        info!(
            "   Rows: {} merged, {} rejected",
            self.totals.rows_merged, self.totals.rows_rejected
        );
        info!("   Success rate: {:.1}%", self.success_rate);

        for outcome in self.outcomes.values() {
            if let OutcomeStatus::Failed(reason) = &outcome.status {
                warn!("⚠️  {} failed: {}", outcome.key, reason);
            }
        }
    }

    /// Write the report as pretty JSON to `<dir>/sync_report_<timestamp>.json`
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(format!(
            "sync_report_{}.json",
            self.finished_at.format("%Y%m%d_%H%M%S")
        ));
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, json).await?;

        info!("💾 Saved sync report to {}", path.display());
        Ok(path)
    }
}
