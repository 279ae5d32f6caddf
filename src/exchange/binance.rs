//! Binance spot klines
//!
//! Endpoint: `GET /api/v3/klines?symbol=BTCUSDT&interval=1m&limit=1000&startTime=<ms>`
//! Returns: bare JSON array of positional rows, open time already in ms:
//! `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`

use super::{EpochUnit, ExchangeAdapter, FetchError, FieldMap, KlineRow, PAGE_LIMIT};
use crate::pipeline::types::RawCandle;
use async_trait::async_trait;

pub const BINANCE_KLINES_URL: &str = "https://data-api.binance.vision/api/v3/klines";

const EXCHANGE: &str = "binance";

/// Upstream interval parameter for 1-minute bars
const BINANCE_INTERVAL: &str = "1m";

pub const BINANCE_FIELDS: FieldMap = FieldMap {
    timestamp: 0,
    open: 1,
    high: 2,
    low: 3,
    close: 4,
    volume: 5,
    epoch_unit: EpochUnit::Millis,
};

pub struct BinanceAdapter {
    client: reqwest::Client,
    url: String,
}

impl BinanceAdapter {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Query parameters for one page; `startTime` is watermark + 1ms
    pub fn query(symbol: &str, since: Option<i64>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("interval", BINANCE_INTERVAL.to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        if let Some(watermark) = since {
            params.push(("startTime", watermark.saturating_add(1).to_string()));
        }
        params
    }

    /// Parse a klines response body
    pub fn parse_body(body: &str) -> Result<Vec<KlineRow>, FetchError> {
        serde_json::from_str(body)
            .map_err(|e| FetchError::malformed(EXCHANGE, format!("klines body: {}", e)))
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    type Native = KlineRow;

    fn exchange(&self) -> &'static str {
        EXCHANGE
    }

    async fn fetch(&self, symbol: &str, since: Option<i64>) -> Result<Vec<KlineRow>, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .query(&Self::query(symbol, since))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                exchange: EXCHANGE,
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        Self::parse_body(&body)
    }

    fn normalize(&self, native: Vec<KlineRow>, symbol: &str) -> Result<Vec<RawCandle>, FetchError> {
        BINANCE_FIELDS.normalize(EXCHANGE, native, symbol)
    }
}
