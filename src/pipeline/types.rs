//! Core candle records shared by every pipeline stage
//!
//! Timestamps are epoch milliseconds (UTC, bar start) everywhere except
//! `TimeDimensionRow::epoch`, which keeps whatever magnitude the raw store holds.

use chrono::{DateTime, NaiveDate, Utc};

/// Finest source interval; the only one promoted into `fact_candles`
pub const FINEST_INTERVAL: &str = "1m";

/// One exchange-reported bar, as stored in `raw_ohlc`
///
/// Natural key: (timestamp, symbol, interval, exchange)
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub symbol: String,
    pub interval: String,
    pub exchange: String,
}

/// Canonical finest-granularity candle, as stored in `fact_candles`
///
/// Natural key: (timestamp, symbol, exchange)
#[derive(Debug, Clone, PartialEq)]
pub struct FactCandle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub symbol: String,
    pub interval: String,
    pub exchange: String,
}

impl From<RawCandle> for FactCandle {
    fn from(raw: RawCandle) -> Self {
        Self {
            timestamp: raw.timestamp,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
            symbol: raw.symbol,
            interval: raw.interval,
            exchange: raw.exchange,
        }
    }
}

/// One bucket of a coarser timeframe
///
/// `first_ts` / `last_ts` are the source timestamps that produced `open` / `close`,
/// kept so later fact rows can be folded in without rereading the bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedCandle {
    pub symbol: String,
    pub exchange: String,
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub first_ts: i64,
    pub last_ts: i64,
}

impl AggregatedCandle {
    /// Start a bucket from its first fact row
    pub fn open_bucket(bucket_start: i64, fact: &FactCandle) -> Self {
        Self {
            symbol: fact.symbol.clone(),
            exchange: fact.exchange.clone(),
            bucket_start,
            open: fact.open,
            high: fact.high,
            low: fact.low,
            close: fact.close,
            volume: fact.volume,
            first_ts: fact.timestamp,
            last_ts: fact.timestamp,
        }
    }

    /// Fold one fact row into the bucket
    ///
    /// open/close follow source timestamps, not arrival order. A row must be
    /// folded at most once: volume is a plain sum.
    pub fn fold(&mut self, fact: &FactCandle) {
        if fact.timestamp < self.first_ts {
            self.open = fact.open;
            self.first_ts = fact.timestamp;
        }
        if fact.timestamp >= self.last_ts {
            self.close = fact.close;
            self.last_ts = fact.timestamp;
        }
        self.high = self.high.max(fact.high);
        self.low = self.low.min(fact.low);
        self.volume += fact.volume;
    }
}

/// Aggregated candle plus change against the previous bucket's close
#[derive(Debug, Clone, PartialEq)]
pub struct PercentChangeRow {
    pub candle: AggregatedCandle,
    /// None for the first bucket of a (symbol, exchange) or a zero previous close
    pub pct_change: Option<f64>,
}

/// Fact candle joined with its session flags, as read from `v_candles`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCandle {
    pub candle: FactCandle,
    pub utc_timestamp: DateTime<Utc>,
    pub session: Session,
    pub is_london_killzone: bool,
    pub is_ny_killzone: bool,
    pub is_london_ny_overlap: bool,
}

/// Trading session implied by the UTC hour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Session {
    Asia,
    London,
    NewYork,
    Off,
}

impl Session {
    /// Half-open boundaries: [0,8) ASIA, [8,13) LONDON, [13,22) NEW_YORK, [22,24) OFF
    pub fn from_utc_hour(hour: u32) -> Self {
        match hour {
            0..=7 => Session::Asia,
            8..=12 => Session::London,
            13..=21 => Session::NewYork,
            _ => Session::Off,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Session::Asia => "ASIA",
            Session::London => "LONDON",
            Session::NewYork => "NEW_YORK",
            Session::Off => "OFF",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ASIA" => Some(Session::Asia),
            "LONDON" => Some(Session::London),
            "NEW_YORK" => Some(Session::NewYork),
            "OFF" => Some(Session::Off),
            _ => None,
        }
    }
}

/// Calendar/session breakdown of one raw epoch, as stored in `dim_time`
#[derive(Debug, Clone, PartialEq)]
pub struct TimeDimensionRow {
    pub epoch: i64,
    pub utc_timestamp: DateTime<Utc>,
    pub date: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub iso_week: u32,
    /// 0 = Monday .. 6 = Sunday
    pub weekday: u32,
    pub is_weekend: bool,
    pub session: Session,
    pub is_london_killzone: bool,
    pub is_ny_killzone: bool,
    pub is_london_ny_overlap: bool,
}
