//! KuCoin spot candles
//!
//! Endpoint: `GET /api/v1/market/candles?symbol=BTC-USDT&type=1min&startAt=<s>`
//! Returns an envelope `{ "code": "200000", "data": [[...]] }`; any other code
//! is an application-level failure even under HTTP 200.
//!
//! Row layout differs from Binance: `[time(s), open, close, high, low, volume, turnover]`.

use super::{EpochUnit, ExchangeAdapter, FetchError, FieldMap, KlineRow};
use crate::pipeline::types::RawCandle;
use async_trait::async_trait;
use serde::Deserialize;

pub const KUCOIN_CANDLES_URL: &str = "https://api.kucoin.com/api/v1/market/candles";

const EXCHANGE: &str = "kucoin";

const KUCOIN_INTERVAL: &str = "1min";

const SUCCESS_CODE: &str = "200000";

/// Quote assets recognised when inserting the dash
const QUOTE_ASSETS: [&str; 5] = ["USDT", "USDC", "BTC", "ETH", "KCS"];

pub const KUCOIN_FIELDS: FieldMap = FieldMap {
    timestamp: 0,
    open: 1,
    high: 3,
    low: 4,
    close: 2,
    volume: 5,
    epoch_unit: EpochUnit::Seconds,
};

#[derive(Debug, Deserialize)]
struct Envelope {
    code: String,
    #[serde(default)]
    data: Option<Vec<KlineRow>>,
    #[serde(default)]
    msg: Option<String>,
}

/// `BTCUSDT` -> `BTC-USDT`; dashed symbols pass through
pub fn kucoin_symbol(symbol: &str) -> String {
    if symbol.contains('-') {
        return symbol.to_string();
    }
    QUOTE_ASSETS
        .iter()
        .find(|quote| symbol.len() > quote.len() && symbol.ends_with(*quote))
        .map(|quote| format!("{}-{}", &symbol[..symbol.len() - quote.len()], quote))
        .unwrap_or_else(|| symbol.to_string())
}

pub struct KucoinAdapter {
    client: reqwest::Client,
    url: String,
}

impl KucoinAdapter {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Query parameters for one page; `startAt` is the watermark in whole seconds
    pub fn query(symbol: &str, since: Option<i64>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", kucoin_symbol(symbol)),
            ("type", KUCOIN_INTERVAL.to_string()),
        ];
        if let Some(watermark) = since {
            params.push(("startAt", watermark.div_euclid(1000).to_string()));
        }
        params
    }

    /// Unwrap the envelope, checking the embedded status code
    pub fn parse_body(body: &str) -> Result<Vec<KlineRow>, FetchError> {
        let envelope: Envelope = serde_json::from_str(body)
            .map_err(|e| FetchError::malformed(EXCHANGE, format!("candles body: {}", e)))?;

        if envelope.code != SUCCESS_CODE {
            return Err(FetchError::Upstream {
                exchange: EXCHANGE,
                code: envelope.code,
                message: envelope.msg.unwrap_or_default(),
            });
        }

        Ok(envelope.data.unwrap_or_default())
    }
}

#[async_trait]
impl ExchangeAdapter for KucoinAdapter {
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
        // Newest-first upstream; the store does not care but logs and tests read better ascending
        let mut candles = KUCOIN_FIELDS.normalize(EXCHANGE, native, symbol)?;
        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "code": "200000",
        "data": [
            ["1700000100", "36505.2", "36518.7", "36520.0", "36500.0", "8.5", "310000.0"],
            ["1700000040", "36500.1", "36505.2", "36510.0", "36490.5", "12.3", "450000.0"]
        ]
    }"#;

    fn adapter() -> KucoinAdapter {
        KucoinAdapter::new(reqwest::Client::new(), KUCOIN_CANDLES_URL)
    }

    #[test]
    fn test_symbol_dash_insertion() {
        assert_eq!(kucoin_symbol("BTCUSDT"), "BTC-USDT");
        assert_eq!(kucoin_symbol("ETHBTC"), "ETH-BTC");
        assert_eq!(kucoin_symbol("SOLUSDC"), "SOL-USDC");
        assert_eq!(kucoin_symbol("BTC-USDT"), "BTC-USDT");
        assert_eq!(kucoin_symbol("USDT"), "USDT");
    }

    #[test]
    fn test_permuted_field_mapping() {
        let rows = KucoinAdapter::parse_body(SAMPLE).unwrap();
        let candles = adapter().normalize(rows, "BTCUSDT").unwrap();

        assert_eq!(candles.len(), 2);
        // Sorted ascending, seconds -> ms
        let first = &candles[0];
        assert_eq!(first.timestamp, 1_700_000_040_000);
        assert_eq!(first.open, 36500.1);
        assert_eq!(first.close, 36505.2);
        assert_eq!(first.high, 36510.0);
        assert_eq!(first.low, 36490.5);
        assert_eq!(first.volume, 12.3);
        assert_eq!(first.symbol, "BTCUSDT");
        assert_eq!(first.interval, "1m");
        assert_eq!(first.exchange, "kucoin");
        assert_eq!(candles[1].timestamp, 1_700_000_100_000);
    }

    #[test]
    fn test_non_success_code_is_upstream_error() {
        let body = r#"{"code":"400100","msg":"This pair is not provided at present"}"#;
        match KucoinAdapter::parse_body(body) {
            Err(FetchError::Upstream { code, message, .. }) => {
                assert_eq!(code, "400100");
                assert!(message.contains("not provided"));
            }
            other => panic!("expected Upstream error, got {:?}", other),
        }
    }

    #[test]
    fn test_success_without_data_is_empty() {
        let rows = KucoinAdapter::parse_body(r#"{"code":"200000","data":[]}"#).unwrap();
        assert!(rows.is_empty());
        let rows = KucoinAdapter::parse_body(r#"{"code":"200000"}"#).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_query_uses_seconds() {
        let params = KucoinAdapter::query("BTCUSDT", Some(1_700_000_040_000));
        assert!(params.contains(&("symbol", "BTC-USDT".to_string())));
        assert!(params.contains(&("type", "1min".to_string())));
        assert!(params.contains(&("startAt", "1700000040".to_string())));
    }
}
