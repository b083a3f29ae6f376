/// Decides which months still need fetching for a key
use chrono::NaiveDate;

use crate::data::Dataset;
use crate::types::Period;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodPlanner {
    pub lookback_months: u32,
    /// Most recent planned periods refetched even when already covered
    pub refresh_recent_months: u32,
}

impl PeriodPlanner {
    pub fn new(lookback_months: u32, refresh_recent_months: u32) -> Self {
        PeriodPlanner {
            lookback_months,
            refresh_recent_months,
        }
    }

    /// `lookback_months` periods walking back from the month of `reference`,
    /// most recent first
    pub fn plan(reference: NaiveDate, lookback_months: u32) -> Vec<Period> {
        let current = Period::of(reference);
        (0..lookback_months).map(|i| current.back(i)).collect()
    }

    /// Keep the periods with no row in `dataset`. Any row in a month counts as
    /// the whole month being synced; partial months are not backfilled.
    pub fn filter_missing(periods: &[Period], dataset: &Dataset) -> Vec<Period> {
        let covered = dataset.covered_periods();
        periods
            .iter()
            .filter(|p| !covered.contains(p))
            .copied()
            .collect()
    }

    /// Planned periods split into (to fetch, skipped), both most recent first
    pub fn partition(&self, reference: NaiveDate, dataset: &Dataset) -> (Vec<Period>, Vec<Period>) {
        let planned = Self::plan(reference, self.lookback_months);
        let covered = dataset.covered_periods();

        planned.into_iter().enumerate().fold(
            (Vec::new(), Vec::new()),
            |(mut fetch, mut skip), (idx, period)| {
                let forced = (idx as u32) < self.refresh_recent_months;
                if forced || !covered.contains(&period) {
                    fetch.push(period);
                } else {
                    skip.push(period);
                }
                (fetch, skip)
            },
        )
    }
}
