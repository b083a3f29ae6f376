/// Core type definitions for the sync engine
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SyncError};
use crate::utils::calendar::roll_back_months;

/// Identifier of one time series (an instrument code such as "2330")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub fn new(code: impl Into<String>) -> Self {
        Key(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(code: &str) -> Self {
        Key::new(code)
    }
}

/// One calendar month in canonical (Gregorian) terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(SyncError::InvalidDate(format!(
                "month {} out of range in period {}",
                month, year
            )));
        }
        Ok(Period { year, month })
    }

    /// Period containing the given canonical date
    pub fn of(date: NaiveDate) -> Self {
        Period {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Walk `months` back, borrowing across year boundaries
    pub fn back(&self, months: u32) -> Self {
        // month is always 1..=12 for a constructed Period
        let (year, month) = roll_back_months(self.year, self.month, months)
            .unwrap_or((self.year, self.month));
        Period { year, month }
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Columns of the fixed daily-price schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Volume,
    Amount,
    Open,
    High,
    Low,
    Close,
    Average,
    Change,
    Trades,
}

impl Field {
    pub fn as_str(&self) -> &str {
        match self {
            Field::Volume => "volume",
            Field::Amount => "amount",
            Field::Open => "open",
            Field::High => "high",
            Field::Low => "low",
            Field::Close => "close",
            Field::Average => "average",
            Field::Change => "change",
            Field::Trades => "trades",
        }
    }

    pub fn parse(name: &str) -> Option<Field> {
        Field::all()
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Integral columns; the rest are prices
    pub fn is_count(&self) -> bool {
        matches!(self, Field::Volume | Field::Amount | Field::Trades)
    }

    pub fn all() -> Vec<Field> {
        vec![
            Field::Volume,
            Field::Amount,
            Field::Open,
            Field::High,
            Field::Low,
            Field::Close,
            Field::Average,
            Field::Change,
            Field::Trades,
        ]
    }
}

/// One daily observation; fields a source does not publish stay `None`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub date: NaiveDate,
    pub volume: Option<u64>,
    pub amount: Option<u64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub average: Option<f64>,
    pub change: Option<f64>,
    pub trades: Option<u64>,
}

impl Row {
    pub fn new(date: NaiveDate) -> Self {
        Row {
            date,
            volume: None,
            amount: None,
            open: None,
            high: None,
            low: None,
            close: None,
            average: None,
            change: None,
            trades: None,
        }
    }

    pub fn period(&self) -> Period {
        Period::of(self.date)
    }

    /// Value of a column as f64, for uniform rendering
    pub fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::Volume => self.volume.map(|v| v as f64),
            Field::Amount => self.amount.map(|v| v as f64),
            Field::Open => self.open,
            Field::High => self.high,
            Field::Low => self.low,
            Field::Close => self.close,
            Field::Average => self.average,
            Field::Change => self.change,
            Field::Trades => self.trades.map(|v| v as f64),
        }
    }

    pub fn set_count(&mut self, field: Field, value: u64) {
        match field {
            Field::Volume => self.volume = Some(value),
            Field::Amount => self.amount = Some(value),
            Field::Trades => self.trades = Some(value),
            other => self.set_price(other, value as f64),
        }
    }

    pub fn set_price(&mut self, field: Field, value: f64) {
        match field {
            Field::Open => self.open = Some(value),
            Field::High => self.high = Some(value),
            Field::Low => self.low = Some(value),
            Field::Close => self.close = Some(value),
            Field::Average => self.average = Some(value),
            Field::Change => self.change = Some(value),
            other => self.set_count(other, value as u64),
        }
    }
}

/// Textual date as published upstream, tagged with its calendar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawDate {
    /// Offset calendar, e.g. "114/08/01"
    Offset(String),
    /// Canonical calendar, e.g. "2025-08-01"
    Canonical(String),
}

/// One unvalidated row returned by a data source
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub date: RawDate,
    pub cells: Vec<(Field, String)>,
}

impl RawRow {
    pub fn offset(date: impl Into<String>) -> Self {
        RawRow {
            date: RawDate::Offset(date.into()),
            cells: Vec::new(),
        }
    }

    pub fn canonical(date: impl Into<String>) -> Self {
        RawRow {
            date: RawDate::Canonical(date.into()),
            cells: Vec::new(),
        }
    }

    pub fn cell(mut self, field: Field, value: impl Into<String>) -> Self {
        self.cells.push((field, value.into()));
        self
    }
}

/// Calendar used for the textual date column of persisted datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateStyle {
    /// "114/08/01"
    #[default]
    Offset,
    /// "2025-08-01"
    Iso,
}

/// Failure of a single period after retry exhaustion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodFailure {
    pub period: Period,
    pub attempts: u32,
    pub reason: String,
}

/// Terminal state of one key's run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Merged dataset written to the store
    Persisted,
    /// Nothing merged; store left untouched
    Empty,
    /// Key aborted (non-retryable source error, persistence failure, panic)
    Failed(String),
    /// Key never started because the run was cancelled
    Cancelled,
}

/// Per-key summary of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub key: Key,
    pub fetched: Vec<Period>,
    pub skipped: Vec<Period>,
    pub failed: Vec<PeriodFailure>,
    pub rows_merged: usize,
    pub rows_rejected: usize,
    pub final_row_count: usize,
    pub status: OutcomeStatus,
    /// Run stopped early by cancellation; outcome covers a subset of periods
    pub interrupted: bool,
}

impl FetchOutcome {
    pub fn new(key: Key) -> Self {
        FetchOutcome {
            key,
            fetched: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            rows_merged: 0,
            rows_rejected: 0,
            final_row_count: 0,
            status: OutcomeStatus::Empty,
            interrupted: false,
        }
    }

    pub fn failed(key: Key, reason: impl Into<String>) -> Self {
        FetchOutcome {
            status: OutcomeStatus::Failed(reason.into()),
            ..FetchOutcome::new(key)
        }
    }

    pub fn cancelled(key: Key) -> Self {
        FetchOutcome {
            status: OutcomeStatus::Cancelled,
            interrupted: true,
            ..FetchOutcome::new(key)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Persisted | OutcomeStatus::Empty)
    }
}
