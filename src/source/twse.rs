/// TWSE (listed companies) monthly STOCK_DAY client
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::source::{rows_from_table, transport_error, DataSource, HeaderPool};
use crate::types::{Key, Period, RawRow};

const BASE_URL: &str = "https://www.twse.com.tw/exchangeReport/STOCK_DAY";
const REFERER: &str = "https://www.twse.com.tw/";

#[derive(Debug, Deserialize)]
struct StockDayResponse {
    #[serde(default)]
    stat: String,
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

pub struct TwseDailySource {
    client: Client,
    headers: HeaderPool,
    base_url: String,
}

impl TwseDailySource {
    pub fn new(timeout: Duration, headers: HeaderPool) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(TwseDailySource {
            client,
            headers,
            base_url: BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, key: &Key, period: Period) -> String {
        format!(
            "{}?response=json&date={:04}{:02}01&stockNo={}",
            self.base_url, period.year, period.month, key
        )
    }

    pub(crate) fn parse_response(body: &str) -> Result<Vec<RawRow>> {
        let response: StockDayResponse = serde_json::from_str(body)
            .map_err(|e| SyncError::MalformedResponse(format!("STOCK_DAY json: {}", e)))?;

        // "很抱歉，沒有符合條件的資料!" and friends: a month without trading data
        if response.data.is_empty() {
            debug!("STOCK_DAY returned no rows (stat: {})", response.stat);
            return Ok(Vec::new());
        }
        if response.fields.is_empty() {
            return Err(SyncError::MalformedResponse(
                "STOCK_DAY data without fields".to_string(),
            ));
        }

        rows_from_table(&response.fields, &response.data)
    }
}

#[async_trait]
impl DataSource for TwseDailySource {
    fn name(&self) -> &str {
        "twse"
    }

    async fn fetch_period(&self, key: &Key, period: Period) -> Result<Vec<RawRow>> {
        let url = self.url(key, period);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("User-Agent", self.headers.user_agent())
            .header("Accept-Language", self.headers.accept_language())
            .header("Referer", REFERER)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await.map_err(transport_error)?;
        Self::parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, RawDate};

    const SAMPLE: &str = r#"{
        "stat": "OK",
        "date": "20250801",
        "title": "114年08月 2330 台積電 各日成交資訊",
        "fields": ["日期","成交股數","成交金額","開盤價","最高價","最低價","收盤價","漲跌價差","成交筆數","註記"],
        "data": [
            ["114/08/01","28,345,772","32,610,419,553","1,150.00","1,155.00","1,140.00","1,145.00","-10.00","41,876",""],
            ["114/08/04","25,101,200","28,980,100,000","1,140.00","1,160.00","1,135.00","1,155.00","+10.00","39,002",""]
        ]
    }"#;

    #[test]
    fn test_parse_stock_day() {
        let rows = TwseDailySource::parse_response(SAMPLE).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, RawDate::Offset("114/08/01".into()));
        let fields: Vec<Field> = rows[0].cells.iter().map(|(f, _)| *f).collect();
        assert_eq!(
            fields,
            vec![
                Field::Volume,
                Field::Amount,
                Field::Open,
                Field::High,
                Field::Low,
                Field::Close,
                Field::Change,
                Field::Trades
            ]
        );
    }

    #[test]
    fn test_no_data_is_empty_not_error() {
        let body = r#"{"stat":"很抱歉，沒有符合條件的資料!"}"#;
        assert!(TwseDailySource::parse_response(body).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = TwseDailySource::parse_response("<html>busy</html>").unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_url() {
        let source = TwseDailySource::new(Duration::from_secs(10), HeaderPool::default())
            .unwrap()
            .with_base_url("http://localhost/STOCK_DAY");
        assert_eq!(
            source.url(&Key::new("2330"), Period::new(2025, 8).unwrap()),
            "http://localhost/STOCK_DAY?response=json&date=20250801&stockNo=2330"
        );
    }
}
