//! Exchange adapters
//!
//! Each exchange implements [`ExchangeAdapter`]: fetch one page of native kline
//! rows strictly after a watermark, then normalize them into [`RawCandle`]s.
//! [`Retrying`] wraps an adapter with the [`RetryPolicy`] and exposes it as the
//! object-safe [`CandleSource`] the ingestor drives.
//!
//! ```text
//! Exchange::Binance ─┐
//!                    ├─> Retrying<A: ExchangeAdapter> ─> Arc<dyn CandleSource> ─> Ingestor
//! Exchange::Kucoin  ─┘
//! ```

pub mod binance;
pub mod kucoin;
pub mod retry;

pub use binance::BinanceAdapter;
pub use kucoin::KucoinAdapter;
pub use retry::RetryPolicy;

use crate::pipeline::types::{RawCandle, FINEST_INTERVAL};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Max rows requested per call
pub const PAGE_LIMIT: usize = 1000;

/// One native kline row, positional as the exchange sends it
pub type KlineRow = Vec<Value>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{exchange} returned HTTP {status}")]
    HttpStatus { exchange: &'static str, status: u16 },

    #[error("{exchange} returned error code {code}: {message}")]
    Upstream {
        exchange: &'static str,
        code: String,
        message: String,
    },

    #[error("malformed {exchange} payload: {reason}")]
    Malformed {
        exchange: &'static str,
        reason: String,
    },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    pub fn malformed(exchange: &'static str, reason: impl Into<String>) -> Self {
        FetchError::Malformed {
            exchange,
            reason: reason.into(),
        }
    }
}

/// Epoch unit an exchange reports bar starts in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochUnit {
    Millis,
    Seconds,
}

impl EpochUnit {
    pub fn to_millis(&self, value: i64) -> Option<i64> {
        match self {
            EpochUnit::Millis => Some(value),
            EpochUnit::Seconds => value.checked_mul(1000),
        }
    }
}

/// Source index of each canonical OHLCV field in a native kline row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMap {
    pub timestamp: usize,
    pub open: usize,
    pub high: usize,
    pub low: usize,
    pub close: usize,
    pub volume: usize,
    pub epoch_unit: EpochUnit,
}

impl FieldMap {
    /// Highest index this map reads
    fn width(&self) -> usize {
        [self.timestamp, self.open, self.high, self.low, self.close, self.volume]
            .into_iter()
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Map native rows to canonical candles stored under [`FINEST_INTERVAL`]
    pub fn normalize(
        &self,
        exchange: &'static str,
        rows: Vec<KlineRow>,
        symbol: &str,
    ) -> Result<Vec<RawCandle>, FetchError> {
        let width = self.width();
        let mut candles = Vec::with_capacity(rows.len());

        for (i, row) in rows.iter().enumerate() {
            if row.len() < width {
                return Err(FetchError::malformed(
                    exchange,
                    format!("row {} has {} fields, expected at least {}", i, row.len(), width),
                ));
            }

            let raw_ts = value_as_i64(&row[self.timestamp])
                .ok_or_else(|| FetchError::malformed(exchange, format!("row {}: bad timestamp", i)))?;
            let timestamp = self
                .epoch_unit
                .to_millis(raw_ts)
                .ok_or_else(|| FetchError::malformed(exchange, format!("row {}: timestamp overflow", i)))?;
            // Stored bars must map back to a UTC instant
            if DateTime::<Utc>::from_timestamp_millis(timestamp).is_none() {
                return Err(FetchError::malformed(
                    exchange,
                    format!("row {}: timestamp {} out of range", i, timestamp),
                ));
            }

            let field = |idx: usize, name: &str| {
                value_as_f64(&row[idx]).ok_or_else(|| {
                    FetchError::malformed(exchange, format!("row {}: bad {} {:?}", i, name, row[idx]))
                })
            };

            let volume = field(self.volume, "volume")?;
            if volume < 0.0 {
                return Err(FetchError::malformed(
                    exchange,
                    format!("row {}: negative volume {}", i, volume),
                ));
            }

            candles.push(RawCandle {
                timestamp,
                open: field(self.open, "open")?,
                high: field(self.high, "high")?,
                low: field(self.low, "low")?,
                close: field(self.close, "close")?,
                volume,
                symbol: symbol.to_string(),
                interval: FINEST_INTERVAL.to_string(),
                exchange: exchange.to_string(),
            });
        }

        Ok(candles)
    }
}

/// Accepts JSON numbers and numeric strings; rejects non-finite values
fn value_as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Two-step exchange capability: fetch a native page, then normalize it
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    type Native: Send;

    /// Exchange identity stored in the `exchange` column
    fn exchange(&self) -> &'static str;

    /// Fetch up to one page of bars strictly after `since` (epoch ms)
    ///
    /// `Ok(vec![])` means "no new data", not a failure.
    async fn fetch(&self, symbol: &str, since: Option<i64>) -> Result<Vec<Self::Native>, FetchError>;

    /// Convert native rows into canonical candles
    fn normalize(&self, native: Vec<Self::Native>, symbol: &str) -> Result<Vec<RawCandle>, FetchError>;
}

/// Object-safe candle source consumed by the ingestor
#[async_trait]
pub trait CandleSource: Send + Sync {
    fn exchange(&self) -> &'static str;

    /// Interval the returned candles are stored under
    fn interval(&self) -> &'static str {
        FINEST_INTERVAL
    }

    /// Fetch and normalize one page strictly after `since`, retrying per policy
    async fn fetch_candles(&self, symbol: &str, since: Option<i64>) -> Result<Vec<RawCandle>, FetchError>;
}

/// Adapter + retry policy
pub struct Retrying<A> {
    adapter: A,
    policy: RetryPolicy,
}

impl<A: ExchangeAdapter> Retrying<A> {
    pub fn new(adapter: A, policy: RetryPolicy) -> Self {
        Self { adapter, policy }
    }
}

#[async_trait]
impl<A: ExchangeAdapter> CandleSource for Retrying<A> {
    fn exchange(&self) -> &'static str {
        self.adapter.exchange()
    }

    async fn fetch_candles(&self, symbol: &str, since: Option<i64>) -> Result<Vec<RawCandle>, FetchError> {
        let label = format!("{}:{}", self.adapter.exchange(), symbol);

        // Malformed payloads are retried like transport failures
        let mut candles = self
            .policy
            .run(&label, |_attempt| async move {
                let native = self.adapter.fetch(symbol, since).await?;
                self.adapter.normalize(native, symbol)
            })
            .await?;

        // Cursor granularity differs per exchange; the watermark bar itself never comes back
        if let Some(watermark) = since {
            let before = candles.len();
            candles.retain(|c| c.timestamp > watermark);
            if candles.len() < before {
                log::debug!(
                    "🔁 [{}] dropped {} bars at or before watermark {}",
                    label,
                    before - candles.len(),
                    watermark
                );
            }
        }

        Ok(candles)
    }
}

/// HTTP bounds applied to every exchange call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub total: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(10),
            total: Duration::from_secs(15),
        }
    }
}

/// Build the shared HTTP client
pub fn http_client(timeouts: &HttpTimeouts) -> Result<reqwest::Client, FetchError> {
    let client = reqwest::Client::builder()
        .connect_timeout(timeouts.connect)
        .read_timeout(timeouts.read)
        .timeout(timeouts.total)
        .user_agent(concat!("ohlcflow/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Base URLs per exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeEndpoints {
    pub binance_klines: String,
    pub kucoin_candles: String,
}

impl Default for ExchangeEndpoints {
    fn default() -> Self {
        Self {
            binance_klines: binance::BINANCE_KLINES_URL.to_string(),
            kucoin_candles: kucoin::KUCOIN_CANDLES_URL.to_string(),
        }
    }
}

/// Registered exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    Binance,
    Kucoin,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Binance => "binance",
            Exchange::Kucoin => "kucoin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "binance" => Some(Exchange::Binance),
            "kucoin" => Some(Exchange::Kucoin),
            _ => None,
        }
    }

    pub fn all() -> [Exchange; 2] {
        [Exchange::Binance, Exchange::Kucoin]
    }

    /// Build this exchange's retrying candle source
    pub fn source(
        &self,
        client: &reqwest::Client,
        endpoints: &ExchangeEndpoints,
        policy: RetryPolicy,
    ) -> Arc<dyn CandleSource> {
        match self {
            Exchange::Binance => Arc::new(Retrying::new(
                BinanceAdapter::new(client.clone(), endpoints.binance_klines.clone()),
                policy,
            )),
            Exchange::Kucoin => Arc::new(Retrying::new(
                KucoinAdapter::new(client.clone(), endpoints.kucoin_candles.clone()),
                policy,
            )),
        }
    }
}

/// One candle source per registered exchange
pub fn build_registry(
    client: &reqwest::Client,
    endpoints: &ExchangeEndpoints,
    policy: RetryPolicy,
) -> Vec<Arc<dyn CandleSource>> {
    Exchange::all()
        .iter()
        .map(|exchange| exchange.source(client, endpoints, policy))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MAP: FieldMap = FieldMap {
        timestamp: 0,
        open: 1,
        high: 2,
        low: 3,
        close: 4,
        volume: 5,
        epoch_unit: EpochUnit::Millis,
    };

    #[test]
    fn test_normalize_accepts_strings_and_numbers() {
        let rows = vec![vec![json!(1_700_000_000_000i64), json!("1.5"), json!(2.0), json!("1.0"), json!("1.75"), json!("10")]];
        let candles = MAP.normalize("test", rows, "BTCUSDT").unwrap();

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].timestamp, 1_700_000_000_000);
        assert_eq!(candles[0].open, 1.5);
        assert_eq!(candles[0].high, 2.0);
        assert_eq!(candles[0].close, 1.75);
        assert_eq!(candles[0].interval, FINEST_INTERVAL);
        assert_eq!(candles[0].exchange, "test");
    }

    #[test]
    fn test_normalize_rejects_short_row() {
        let rows = vec![vec![json!(1), json!("1.0")]];
        let err = MAP.normalize("test", rows, "BTCUSDT").unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
    }

    #[test]
    fn test_normalize_rejects_negative_volume() {
        let rows = vec![vec![json!(1), json!("1"), json!("1"), json!("1"), json!("1"), json!("-3")]];
        assert!(MAP.normalize("test", rows, "BTCUSDT").is_err());
    }

    #[test]
    fn test_normalize_rejects_non_numeric() {
        let rows = vec![vec![json!(1), json!("abc"), json!("1"), json!("1"), json!("1"), json!("1")]];
        assert!(MAP.normalize("test", rows, "BTCUSDT").is_err());
    }

    #[test]
    fn test_normalize_rejects_unrepresentable_timestamp() {
        let rows = vec![vec![json!(i64::MAX), json!("1"), json!("1"), json!("1"), json!("1"), json!("1")]];
        let err = MAP.normalize("test", rows, "BTCUSDT").unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));

        let rows = vec![vec![json!(i64::MIN), json!("1"), json!("1"), json!("1"), json!("1"), json!("1")]];
        assert!(MAP.normalize("test", rows, "BTCUSDT").is_err());
    }

    #[test]
    fn test_seconds_epoch_unit() {
        assert_eq!(EpochUnit::Seconds.to_millis(1_700_000_000), Some(1_700_000_000_000));
        assert_eq!(EpochUnit::Millis.to_millis(42), Some(42));
        assert_eq!(EpochUnit::Seconds.to_millis(i64::MAX), None);
    }

    #[test]
    fn test_exchange_names() {
        for exchange in Exchange::all() {
            assert_eq!(Exchange::from_str(exchange.as_str()), Some(exchange));
        }
        assert_eq!(Exchange::from_str(" Binance "), Some(Exchange::Binance));
        assert_eq!(Exchange::from_str("kraken"), None);
    }

    struct StaticAdapter {
        rows: Vec<KlineRow>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExchangeAdapter for StaticAdapter {
        type Native = KlineRow;

        fn exchange(&self) -> &'static str {
            "static"
        }

        async fn fetch(&self, _symbol: &str, _since: Option<i64>) -> Result<Vec<KlineRow>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.clone())
        }

        fn normalize(&self, native: Vec<KlineRow>, symbol: &str) -> Result<Vec<RawCandle>, FetchError> {
            MAP.normalize(self.exchange(), native, symbol)
        }
    }

    fn row(ts: i64) -> KlineRow {
        vec![json!(ts), json!("1"), json!("1"), json!("1"), json!("1"), json!("1")]
    }

    #[tokio::test]
    async fn test_retrying_drops_watermark_bar() {
        let adapter = StaticAdapter {
            rows: vec![row(60_000), row(120_000), row(180_000)],
            calls: AtomicUsize::new(0),
        };
        let source = Retrying::new(adapter, RetryPolicy::new(3, Duration::ZERO));

        let candles = source.fetch_candles("BTCUSDT", Some(120_000)).await.unwrap();

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].timestamp, 180_000);
    }

    #[tokio::test]
    async fn test_empty_page_is_not_retried() {
        let adapter = StaticAdapter {
            rows: vec![],
            calls: AtomicUsize::new(0),
        };
        let source = Retrying::new(adapter, RetryPolicy::new(3, Duration::ZERO));

        let candles = source.fetch_candles("BTCUSDT", None).await.unwrap();

        assert!(candles.is_empty());
        assert_eq!(source.adapter.calls.load(Ordering::SeqCst), 1);
    }
}
