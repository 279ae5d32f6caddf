//! Target timeframes and bucket truncation

use chrono::{DateTime, Datelike, Days, NaiveDate, Timelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    Hour1,
    Hour4,
    Day1,
    Week1,
    Month1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1d",
            Timeframe::Week1 => "1w",
            Timeframe::Month1 => "1mth",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1h" => Some(Timeframe::Hour1),
            "4h" => Some(Timeframe::Hour4),
            "1d" => Some(Timeframe::Day1),
            "1w" => Some(Timeframe::Week1),
            "1mth" | "1month" => Some(Timeframe::Month1),
            _ => None,
        }
    }

    pub fn all() -> [Timeframe; 5] {
        [
            Timeframe::Hour1,
            Timeframe::Hour4,
            Timeframe::Day1,
            Timeframe::Week1,
            Timeframe::Month1,
        ]
    }

    /// Aggregated table name (`ohlc_1h`, ...)
    pub fn table(&self) -> &'static str {
        match self {
            Timeframe::Hour1 => "ohlc_1h",
            Timeframe::Hour4 => "ohlc_4h",
            Timeframe::Day1 => "ohlc_1d",
            Timeframe::Week1 => "ohlc_1w",
            Timeframe::Month1 => "ohlc_1mth",
        }
    }

    /// Percent-change view name (`v_ohlc_1h`, ...)
    pub fn view(&self) -> &'static str {
        match self {
            Timeframe::Hour1 => "v_ohlc_1h",
            Timeframe::Hour4 => "v_ohlc_4h",
            Timeframe::Day1 => "v_ohlc_1d",
            Timeframe::Week1 => "v_ohlc_1w",
            Timeframe::Month1 => "v_ohlc_1mth",
        }
    }

    /// Start (epoch ms, UTC) of the bucket containing `timestamp_ms`
    ///
    /// - 1h / 1d: calendar truncation
    /// - 4h: hour truncation minus `hour % 4`, aligned to 0,4,...,20 UTC
    /// - 1w: Monday 00:00
    /// - 1mth: first of month 00:00
    ///
    /// Returns None for timestamps chrono cannot represent.
    pub fn bucket_start(&self, timestamp_ms: i64) -> Option<i64> {
        let dt = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)?;
        let day = dt.date_naive();

        let start = match self {
            Timeframe::Hour1 => day.and_hms_opt(dt.hour(), 0, 0)?,
            Timeframe::Hour4 => day.and_hms_opt(dt.hour() - dt.hour() % 4, 0, 0)?,
            Timeframe::Day1 => day.and_hms_opt(0, 0, 0)?,
            Timeframe::Week1 => {
                let back = Days::new(u64::from(day.weekday().num_days_from_monday()));
                day.checked_sub_days(back)?.and_hms_opt(0, 0, 0)?
            }
            Timeframe::Month1 => NaiveDate::from_ymd_opt(day.year(), day.month(), 1)?
                .and_hms_opt(0, 0, 0)?,
        };

        Some(start.and_utc().timestamp_millis())
    }
}
