/// Per-key dataset and the merge/dedup/sort step that maintains it
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::types::{Field, Period, RawRow, Row};
use crate::utils::CalendarNormalizer;

/// Cell values meaning "no trade that day"
const NO_TRADE_MARKERS: &[&str] = &["--", "---", "----", "N/A", "X", "除權息"];

/// Rows unique by date, sorted by date descending.
///
/// Only the merger builds datasets, so every value upholds both invariants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    rows: Vec<Row>,
}

impl Dataset {
    pub fn empty() -> Self {
        Dataset::default()
    }

    /// Normalise arbitrary rows (e.g. freshly loaded from disk)
    pub fn from_rows(rows: Vec<Row>) -> Self {
        DatasetMerger::merge(&Dataset::empty(), rows)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn latest(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&Row> {
        // descending order: search with reversed comparison
        self.rows
            .binary_search_by(|row| date.cmp(&row.date))
            .ok()
            .map(|idx| &self.rows[idx])
    }

    /// Every period with at least one row
    pub fn covered_periods(&self) -> BTreeSet<Period> {
        self.rows.iter().map(Row::period).collect()
    }

    /// Columns that carry a value in at least one row
    pub fn populated_fields(&self) -> Vec<Field> {
        Field::all()
            .into_iter()
            .filter(|f| self.rows.iter().any(|r| r.get(*f).is_some()))
            .collect()
    }
}

/// Validated rows of one period plus the number of rows dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub rows: Vec<Row>,
    pub rejected: usize,
}

pub struct DatasetMerger;

impl DatasetMerger {
    /// Convert raw source rows into typed rows. Rows with an invalid date, a
    /// non-numeric cell or a "no trade" marker are dropped and counted.
    pub fn validate(raw: Vec<RawRow>, calendar: &CalendarNormalizer) -> Batch {
        let mut batch = Batch::default();

        for raw_row in raw {
            match Self::validate_row(&raw_row, calendar) {
                Ok(row) => batch.rows.push(row),
                Err(e) => {
                    debug!("Dropping row {:?}: {}", raw_row.date, e);
                    batch.rejected += 1;
                }
            }
        }

        batch
    }

    pub fn validate_row(raw: &RawRow, calendar: &CalendarNormalizer) -> Result<Row> {
        let date = calendar.normalize(&raw.date)?;
        let mut row = Row::new(date);

        for (field, text) in &raw.cells {
            if field.is_count() {
                row.set_count(*field, parse_count(text)?);
            } else {
                row.set_price(*field, parse_price(text)?);
            }
        }

        Ok(row)
    }

    /// Fold `incoming` into `existing`: dedup by date (last writer wins) and
    /// sort descending. `merge(&merge(a, b), b) == merge(a, b)`.
    pub fn merge(existing: &Dataset, incoming: Vec<Row>) -> Dataset {
        let mut by_date: BTreeMap<NaiveDate, Row> = existing
            .rows
            .iter()
            .map(|row| (row.date, row.clone()))
            .collect();

        for row in incoming {
            by_date.insert(row.date, row);
        }

        Dataset {
            rows: by_date.into_values().rev().collect(),
        }
    }
}

fn clean_number(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || NO_TRADE_MARKERS.contains(&trimmed) {
        return Err(SyncError::MalformedResponse(format!("no-trade marker '{}'", trimmed)));
    }
    Ok(trimmed.replace(',', ""))
}

fn parse_count(text: &str) -> Result<u64> {
    let cleaned = clean_number(text)?;
    cleaned
        .parse::<u64>()
        .map_err(|_| SyncError::MalformedResponse(format!("expected integer, got '{}'", text.trim())))
}

fn parse_price(text: &str) -> Result<f64> {
    let cleaned = clean_number(text)?;
    // change column prefixes: "+1.50", "-0.50", "X0.00" (ex-rights day)
    let signed = cleaned.trim_start_matches(['+', 'X', 'x']);
    let value = signed
        .parse::<f64>()
        .map_err(|_| SyncError::MalformedResponse(format!("expected number, got '{}'", text.trim())))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SyncError::MalformedResponse(format!("non-finite number '{}'", text.trim())))
    }
}
