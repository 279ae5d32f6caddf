//! Pipeline configuration from environment variables
//!
//! Built once per run and handed to each stage's constructor.

use super::ingestion::IngestPair;
use super::timeframe::Timeframe;
use crate::exchange::{Exchange, ExchangeEndpoints, HttpTimeouts, RetryPolicy};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PAIRS: &str = "BTCUSDT:binance,BTCUSDT:kucoin";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVariable(String),

    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            var: var.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Configuration for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// (symbol, exchange) pairs to ingest
    pub pairs: Vec<IngestPair>,

    /// Max concurrent pair tasks
    pub pool_size: usize,

    /// Pages fetched per pair per run
    pub max_pages: usize,

    pub retry: RetryPolicy,

    pub timeouts: HttpTimeouts,

    pub endpoints: ExchangeEndpoints,

    /// Aggregation targets
    pub timeframes: Vec<Timeframe>,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `OHLC_DB_PATH` (required)
    /// - `OHLC_PAIRS` (default: BTCUSDT:binance,BTCUSDT:kucoin)
    /// - `INGEST_POOL_SIZE` (default: 4)
    /// - `INGEST_MAX_PAGES` (default: 1)
    /// - `RETRY_MAX_ATTEMPTS` (default: 3)
    /// - `RETRY_BACKOFF_MS` (default: 2000)
    /// - `HTTP_CONNECT_TIMEOUT_SECS` / `HTTP_READ_TIMEOUT_SECS` / `HTTP_TOTAL_TIMEOUT_SECS` (5 / 10 / 15)
    /// - `BINANCE_KLINES_URL`, `KUCOIN_CANDLES_URL` (public endpoints)
    /// - `OHLC_TIMEFRAMES` (default: 1h,4h,1d,1w,1mth)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = get("OHLC_DB_PATH")
            .ok_or_else(|| ConfigError::MissingVariable("OHLC_DB_PATH".to_string()))?;

        let pairs = parse_pairs(
            "OHLC_PAIRS",
            &get("OHLC_PAIRS").unwrap_or_else(|| DEFAULT_PAIRS.to_string()),
        )?;

        let pool_size = parse_at_least_one("INGEST_POOL_SIZE", get("INGEST_POOL_SIZE"), 4)?;
        let max_pages = parse_at_least_one("INGEST_MAX_PAGES", get("INGEST_MAX_PAGES"), 1)?;
        let max_attempts = parse_at_least_one("RETRY_MAX_ATTEMPTS", get("RETRY_MAX_ATTEMPTS"), 3u32)?;
        let backoff_ms: u64 = parse_or("RETRY_BACKOFF_MS", get("RETRY_BACKOFF_MS"), 2_000)?;

        let timeouts = HttpTimeouts {
            connect: Duration::from_secs(parse_or(
                "HTTP_CONNECT_TIMEOUT_SECS",
                get("HTTP_CONNECT_TIMEOUT_SECS"),
                5,
            )?),
            read: Duration::from_secs(parse_or("HTTP_READ_TIMEOUT_SECS", get("HTTP_READ_TIMEOUT_SECS"), 10)?),
            total: Duration::from_secs(parse_or(
                "HTTP_TOTAL_TIMEOUT_SECS",
                get("HTTP_TOTAL_TIMEOUT_SECS"),
                15,
            )?),
        };

        let defaults = ExchangeEndpoints::default();
        let endpoints = ExchangeEndpoints {
            binance_klines: get("BINANCE_KLINES_URL").unwrap_or(defaults.binance_klines),
            kucoin_candles: get("KUCOIN_CANDLES_URL").unwrap_or(defaults.kucoin_candles),
        };

        let timeframes = match get("OHLC_TIMEFRAMES") {
            Some(raw) => parse_timeframes("OHLC_TIMEFRAMES", &raw)?,
            None => Timeframe::all().to_vec(),
        };

        Ok(Self {
            db_path,
            pairs,
            pool_size,
            max_pages,
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(backoff_ms)),
            timeouts,
            endpoints,
            timeframes,
        })
    }
}

fn parse_or<T>(var: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(var, &raw, e.to_string())),
        None => Ok(default),
    }
}

fn parse_at_least_one<T>(var: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + From<u8>,
    T::Err: std::fmt::Display,
{
    let raw = value.clone().unwrap_or_default();
    let parsed = parse_or(var, value, default)?;
    if parsed < T::from(1u8) {
        return Err(ConfigError::invalid(var, &raw, "must be at least 1"));
    }
    Ok(parsed)
}

/// `SYMBOL:exchange[,SYMBOL:exchange...]`
fn parse_pairs(var: &str, raw: &str) -> Result<Vec<IngestPair>, ConfigError> {
    let mut pairs = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (symbol, exchange) = entry
            .split_once(':')
            .ok_or_else(|| ConfigError::invalid(var, entry, "expected SYMBOL:exchange"))?;

        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(ConfigError::invalid(var, entry, "empty symbol"));
        }
        let exchange = Exchange::from_str(exchange)
            .ok_or_else(|| ConfigError::invalid(var, entry, "unknown exchange"))?;

        let pair = IngestPair::new(symbol, exchange.as_str());
        if !pairs.contains(&pair) {
            pairs.push(pair);
        }
    }

    if pairs.is_empty() {
        return Err(ConfigError::invalid(var, raw, "no pairs configured"));
    }
    Ok(pairs)
}

fn parse_timeframes(var: &str, raw: &str) -> Result<Vec<Timeframe>, ConfigError> {
    let mut timeframes = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let tf = Timeframe::from_str(entry)
            .ok_or_else(|| ConfigError::invalid(var, entry, "unknown timeframe"))?;
        if !timeframes.contains(&tf) {
            timeframes.push(tf);
        }
    }

    if timeframes.is_empty() {
        return Err(ConfigError::invalid(var, raw, "no timeframes configured"));
    }
    Ok(timeframes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::from_lookup(lookup(&[("OHLC_DB_PATH", "/tmp/ohlc.db")])).unwrap();

        assert_eq!(config.db_path, "/tmp/ohlc.db");
        assert_eq!(
            config.pairs,
            vec![IngestPair::new("BTCUSDT", "binance"), IngestPair::new("BTCUSDT", "kucoin")]
        );
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.max_pages, 1);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.timeouts, HttpTimeouts::default());
        assert_eq!(config.endpoints, ExchangeEndpoints::default());
        assert_eq!(config.timeframes, Timeframe::all().to_vec());
    }

    #[test]
    fn test_missing_db_path_fails_fast() {
        let err = PipelineConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::MissingVariable("OHLC_DB_PATH".to_string()));

        let err = PipelineConfig::from_lookup(lookup(&[("OHLC_DB_PATH", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVariable(_)));
    }

    #[test]
    fn test_custom_config() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("OHLC_DB_PATH", "/tmp/test.db"),
            ("OHLC_PAIRS", "ethusdt:Binance, SOLUSDT:kucoin, ethusdt:binance"),
            ("INGEST_POOL_SIZE", "2"),
            ("INGEST_MAX_PAGES", "5"),
            ("RETRY_MAX_ATTEMPTS", "4"),
            ("RETRY_BACKOFF_MS", "250"),
            ("HTTP_TOTAL_TIMEOUT_SECS", "30"),
            ("BINANCE_KLINES_URL", "http://127.0.0.1:9000/klines"),
            ("OHLC_TIMEFRAMES", "4h, 1d"),
        ]))
        .unwrap();

        assert_eq!(
            config.pairs,
            vec![IngestPair::new("ETHUSDT", "binance"), IngestPair::new("SOLUSDT", "kucoin")]
        );
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.max_pages, 5);
        assert_eq!(config.retry, RetryPolicy::new(4, Duration::from_millis(250)));
        assert_eq!(config.timeouts.total, Duration::from_secs(30));
        assert_eq!(config.timeouts.connect, Duration::from_secs(5));
        assert_eq!(config.endpoints.binance_klines, "http://127.0.0.1:9000/klines");
        assert_eq!(config.timeframes, vec![Timeframe::Hour4, Timeframe::Day1]);
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            ("INGEST_POOL_SIZE", "0"),
            ("INGEST_POOL_SIZE", "many"),
            ("RETRY_MAX_ATTEMPTS", "0"),
            ("RETRY_BACKOFF_MS", "-1"),
            ("OHLC_PAIRS", "BTCUSDT"),
            ("OHLC_PAIRS", "BTCUSDT:kraken"),
            ("OHLC_TIMEFRAMES", "1h,3h"),
        ];

        for (var, value) in cases {
            let err = PipelineConfig::from_lookup(lookup(&[("OHLC_DB_PATH", "/tmp/x.db"), (var, value)]))
                .unwrap_err();
            match err {
                ConfigError::InvalidValue { var: got, .. } => assert_eq!(got, var),
                other => panic!("{}={} should be invalid, got {:?}", var, value, other),
            }
        }
    }
}
