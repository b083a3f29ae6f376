/// Calendar utilities: offset-year (ROC) <-> canonical date conversion
use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Asia::Taipei;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::types::{DateStyle, Period, RawDate};

/// Offset between the Gregorian year and the ROC (Minguo) year
pub const ROC_OFFSET: i32 = 1911;

/// A date expressed in the offset calendar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

/// Converts between the offset calendar and canonical dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarNormalizer {
    offset: i32,
}

impl Default for CalendarNormalizer {
    fn default() -> Self {
        Self::new(ROC_OFFSET)
    }
}

impl CalendarNormalizer {
    pub fn new(offset: i32) -> Self {
        CalendarNormalizer { offset }
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub fn to_canonical(&self, offset_year: i32, month: u32, day: u32) -> Result<NaiveDate> {
        if !(1..=12).contains(&month) {
            return Err(SyncError::InvalidDate(format!(
                "month {} out of range ({}/{}/{})",
                month, offset_year, month, day
            )));
        }
        let year = offset_year.checked_add(self.offset).ok_or_else(|| {
            SyncError::InvalidDate(format!("year {} out of range", offset_year))
        })?;
        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            SyncError::InvalidDate(format!(
                "day {} out of range ({}/{:02}/{:02})",
                day, offset_year, month, day
            ))
        })
    }

    pub fn to_offset(&self, date: NaiveDate) -> OffsetDate {
        OffsetDate {
            year: date.year() - self.offset,
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn period_key(&self, date: NaiveDate) -> Period {
        Period::of(date)
    }

    /// Parse "114/08/01" (also "114/8/1"); trailing footnote marks are ignored
    pub fn parse_offset(&self, text: &str) -> Result<NaiveDate> {
        let (y, m, d) = split_date(text, &['/'])?;
        self.to_canonical(y, m, d)
    }

    /// Parse "2025-08-01" or "2025/08/01"
    pub fn parse_canonical(&self, text: &str) -> Result<NaiveDate> {
        let (y, m, d) = split_date(text, &['-', '/'])?;
        NaiveDate::from_ymd_opt(y, m, d)
            .ok_or_else(|| SyncError::InvalidDate(format!("invalid date '{}'", text.trim())))
    }

    pub fn normalize(&self, raw: &RawDate) -> Result<NaiveDate> {
        match raw {
            RawDate::Offset(text) => self.parse_offset(text),
            RawDate::Canonical(text) => self.parse_canonical(text),
        }
    }

    pub fn format(&self, date: NaiveDate, style: DateStyle) -> String {
        match style {
            DateStyle::Iso => date.format("%Y-%m-%d").to_string(),
            DateStyle::Offset => {
                let o = self.to_offset(date);
                format!("{}/{:02}/{:02}", o.year, o.month, o.day)
            }
        }
    }

    pub fn parse(&self, text: &str, style: DateStyle) -> Result<NaiveDate> {
        match style {
            DateStyle::Iso => self.parse_canonical(text),
            DateStyle::Offset => self.parse_offset(text),
        }
    }
}

fn split_date(text: &str, separators: &[char]) -> Result<(i32, u32, u32)> {
    let cleaned = text.trim().trim_end_matches(['*', '＊']);
    let invalid = || SyncError::InvalidDate(format!("cannot parse date '{}'", text.trim()));

    let parts: Vec<&str> = cleaned.split(separators).map(str::trim).collect();
    if parts.len() != 3 {
        return Err(invalid());
    }
    let year = parts[0].parse::<i32>().map_err(|_| invalid())?;
    let month = parts[1].parse::<u32>().map_err(|_| invalid())?;
    let day = parts[2].parse::<u32>().map_err(|_| invalid())?;
    Ok((year, month, day))
}

/// Subtract `n` months from (year, month). Calendar agnostic: the year may be
/// canonical or offset, only the month borrow matters.
pub fn roll_back_months(year: i32, month: u32, n: u32) -> Result<(i32, u32)> {
    if !(1..=12).contains(&month) {
        return Err(SyncError::InvalidDate(format!("month {} out of range", month)));
    }
    let index = year as i64 * 12 + (month as i64 - 1) - n as i64;
    let y = index.div_euclid(12) as i32;
    let m = index.rem_euclid(12) as u32 + 1;
    Ok((y, m))
}

/// Today's date on the exchange calendar (Asia/Taipei)
pub fn today_taipei() -> NaiveDate {
    Utc::now().with_timezone(&Taipei).date_naive()
}
