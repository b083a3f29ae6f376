/// Remote data sources returning one month of daily rows per call
use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::types::{Field, Key, Period, RawRow};

pub mod fallback;
pub mod headers;
pub mod tpex;
pub mod twse;

pub use fallback::FallbackSource;
pub use headers::HeaderPool;
pub use tpex::{TpexBoard, TpexDailySource};
pub use twse::TwseDailySource;

#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Rows published for `key` in `period`. `Ok(vec![])` means the month had
    /// no trading data and must not be retried.
    async fn fetch_period(&self, key: &Key, period: Period) -> Result<Vec<RawRow>>;
}

/// Map an upstream column label (whitespace ignored) to a schema field
pub fn field_for_label(label: &str) -> Option<Field> {
    let compact: String = label.chars().filter(|c| !c.is_whitespace()).collect();
    let field = match compact.as_str() {
        "成交股數" | "成交仟股" => Field::Volume,
        "成交金額" | "成交仟元" => Field::Amount,
        "開盤價" | "開盤" => Field::Open,
        "最高價" | "最高" | "成交最高" => Field::High,
        "最低價" | "最低" | "成交最低" => Field::Low,
        "收盤價" | "收盤" => Field::Close,
        "成交均價" | "均價" => Field::Average,
        "漲跌價差" | "漲跌" => Field::Change,
        "成交筆數" | "筆數" => Field::Trades,
        _ => return None,
    };
    Some(field)
}

/// Multiplier for columns published in thousands (TPEx "仟股" / "仟元")
fn label_scale(label: &str) -> u64 {
    if label.contains('仟') {
        1_000
    } else {
        1
    }
}

/// Rescale a thousands cell to units; cells that are not numeric pass
/// through untouched so validation can reject them
fn scale_cell(text: String, scale: u64) -> String {
    if scale == 1 {
        return text;
    }
    let plain = text.trim().replace(',', "");
    if let Ok(n) = plain.parse::<u64>() {
        return n.saturating_mul(scale).to_string();
    }
    match plain.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => ((v * scale as f64).round() as u64).to_string(),
        _ => text,
    }
}

fn is_date_label(label: &str) -> bool {
    let compact: String = label.chars().filter(|c| !c.is_whitespace()).collect();
    compact == "日期" || (compact.contains('日') && compact.contains('期'))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Build raw rows from a `fields` + `data` table whose dates use the offset
/// calendar. Unknown columns are ignored; volume and amount come out in
/// shares and NTD whatever unit the source publishes.
pub fn rows_from_table(fields: &[String], data: &[Vec<Value>]) -> Result<Vec<RawRow>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let date_idx = fields
        .iter()
        .position(|f| is_date_label(f))
        .ok_or_else(|| SyncError::MalformedResponse(format!("no date column in {:?}", fields)))?;

    let mapped: Vec<(usize, Field, u64)> = fields
        .iter()
        .enumerate()
        .filter_map(|(idx, label)| field_for_label(label).map(|f| (idx, f, label_scale(label))))
        .collect();

    data.iter()
        .map(|cells| {
            if cells.len() < fields.len() {
                return Err(SyncError::MalformedResponse(format!(
                    "row has {} cells, expected {}",
                    cells.len(),
                    fields.len()
                )));
            }
            let mut row = RawRow::offset(cell_text(&cells[date_idx]));
            for (idx, field, scale) in &mapped {
                row = row.cell(*field, scale_cell(cell_text(&cells[*idx]), *scale));
            }
            Ok(row)
        })
        .collect()
}

/// Classify reqwest failures for the retry policy
pub(crate) fn transport_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout(e.to_string())
    } else if e.is_connect() {
        SyncError::Transport(e.to_string())
    } else {
        SyncError::Http(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawDate;
    use serde_json::json;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_label_mapping() {
        assert_eq!(field_for_label("收盤價"), Some(Field::Close));
        assert_eq!(field_for_label("成交 仟股"), Some(Field::Volume));
        assert_eq!(field_for_label("成交均價"), Some(Field::Average));
        assert_eq!(field_for_label("註記"), None);
        assert!(is_date_label("日 期"));
    }

    #[test]
    fn test_rows_from_table() {
        let fields = labels(&["日期", "成交股數", "收盤價", "註記"]);
        let data = vec![
            vec![json!("114/08/01"), json!("1,000"), json!("1,145.00"), json!("")],
            vec![json!("114/08/04"), json!(2000), json!("1,150.00"), Value::Null],
        ];

        let rows = rows_from_table(&fields, &data).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, RawDate::Offset("114/08/01".into()));
        assert_eq!(
            rows[0].cells,
            vec![(Field::Volume, "1,000".to_string()), (Field::Close, "1,145.00".to_string())]
        );
        assert_eq!(rows[1].cells[0], (Field::Volume, "2000".to_string()));
    }

    #[test]
    fn test_thousands_columns_are_scaled() {
        let fields = labels(&["日 期", "成交仟股", "成交仟元", "收盤"]);
        let data = vec![
            vec![json!("114/08/01"), json!("1,234"), json!("56,789"), json!("45.80")],
            vec![json!("114/08/04"), json!("--"), json!("0.5"), json!("44.60")],
        ];

        let rows = rows_from_table(&fields, &data).unwrap();
        assert_eq!(
            rows[0].cells,
            vec![
                (Field::Volume, "1234000".to_string()),
                (Field::Amount, "56789000".to_string()),
                (Field::Close, "45.80".to_string()),
            ]
        );
        assert_eq!(rows[1].cells[0], (Field::Volume, "--".to_string()));
        assert_eq!(rows[1].cells[1], (Field::Amount, "500".to_string()));
    }

    #[test]
    fn test_rows_from_table_errors() {
        let data = vec![vec![json!("1"), json!("2")]];
        assert!(matches!(
            rows_from_table(&labels(&["成交股數", "收盤價"]), &data),
            Err(SyncError::MalformedResponse(_))
        ));

        let short = vec![vec![json!("114/08/01")]];
        assert!(matches!(
            rows_from_table(&labels(&["日期", "收盤價"]), &short),
            Err(SyncError::MalformedResponse(_))
        ));

        assert!(rows_from_table(&[], &[]).unwrap().is_empty());
    }
}
