/// TPEx (OTC and emerging boards) monthly trading history client
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::source::{rows_from_table, transport_error, DataSource, HeaderPool};
use crate::types::{Key, Period, RawRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TpexBoard {
    Otc,
    Emerging,
}

impl TpexBoard {
    pub fn url(&self) -> &'static str {
        match self {
            TpexBoard::Otc => "https://www.tpex.org.tw/www/zh-tw/afterTrading/tradingStock",
            TpexBoard::Emerging => "https://www.tpex.org.tw/www/zh-tw/emerging/historical",
        }
    }

    pub fn referer(&self) -> &'static str {
        match self {
            TpexBoard::Otc => "https://www.tpex.org.tw/zh-tw/mainboard/trading/info/stock-pricing.html",
            TpexBoard::Emerging => "https://www.tpex.org.tw/zh-tw/emerging/historical",
        }
    }
}

impl fmt::Display for TpexBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TpexBoard::Otc => write!(f, "tpex_otc"),
            TpexBoard::Emerging => write!(f, "tpex_emerging"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TradingResponse {
    #[serde(default)]
    stat: Option<String>,
    #[serde(default)]
    tables: Vec<TradingTable>,
}

#[derive(Debug, Deserialize)]
struct TradingTable {
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

pub struct TpexDailySource {
    client: Client,
    headers: HeaderPool,
    board: TpexBoard,
    name: String,
    url: String,
}

impl TpexDailySource {
    pub fn new(board: TpexBoard, timeout: Duration, headers: HeaderPool) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(TpexDailySource {
            client,
            headers,
            board,
            name: board.to_string(),
            url: board.url().to_string(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn board(&self) -> TpexBoard {
        self.board
    }

    /// Form body; the endpoint takes the canonical year
    fn form(key: &Key, period: Period) -> Vec<(&'static str, String)> {
        vec![
            ("code", key.to_string()),
            ("date", format!("{:04}/{:02}/01", period.year, period.month)),
            ("id", String::new()),
        ]
    }

    pub(crate) fn parse_response(body: &str) -> Result<Vec<RawRow>> {
        let response: TradingResponse = serde_json::from_str(body)
            .map_err(|e| SyncError::MalformedResponse(format!("tpex json: {}", e)))?;

        let Some(table) = response.tables.into_iter().next() else {
            debug!("TPEx returned no tables (stat: {:?})", response.stat);
            return Ok(Vec::new());
        };
        if table.data.is_empty() {
            return Ok(Vec::new());
        }

        rows_from_table(&table.fields, &table.data)
    }
}

#[async_trait]
impl DataSource for TpexDailySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_period(&self, key: &Key, period: Period) -> Result<Vec<RawRow>> {
        debug!("POST {} code={} period={}", self.url, key, period);

        let response = self
            .client
            .post(&self.url)
            .header("User-Agent", self.headers.user_agent())
            .header("Accept-Language", self.headers.accept_language())
            .header("Referer", self.board.referer())
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&Self::form(key, period))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let body = response.text().await.map_err(transport_error)?;
        Self::parse_response(&body)
    }
}
