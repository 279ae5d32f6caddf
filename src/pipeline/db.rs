//! SQLite candle store
//!
//! Tables (see `/sql/`):
//! - `raw_ohlc` - INSERT OR IGNORE on (timestamp, symbol, interval, exchange)
//! - `fact_candles` - INSERT OR IGNORE on (timestamp, symbol, exchange)
//! - `dim_time` - INSERT OR IGNORE on epoch
//! - `ohlc_<tf>` - UPSERT on (symbol, exchange, bucket_start)
//! - `v_ohlc_<tf>` - read-only views adding `pct_change`
//! - `v_candles` - fact_candles joined with dim_time
//!
//! Watermarks are never stored: they are always `MAX(...)` over the table
//! being extended, so a crash between insert and report is harmless.
//!
//! The connection sits behind `Arc<Mutex<_>>`; callers never hold the lock
//! across an `.await`.

use super::timeframe::Timeframe;
use super::types::{
    AggregatedCandle, FactCandle, PercentChangeRow, RawCandle, Session, SessionCandle,
    TimeDimensionRow,
};
use crate::sqlite_pragma::apply_optimized_pragmas;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Schema files, applied in order. All use IF NOT EXISTS.
const MIGRATIONS: [(&str, &str); 5] = [
    ("00_raw_ohlc.sql", include_str!("../../sql/00_raw_ohlc.sql")),
    ("01_fact_candles.sql", include_str!("../../sql/01_fact_candles.sql")),
    ("02_dim_time.sql", include_str!("../../sql/02_dim_time.sql")),
    ("03_ohlc_timeframes.sql", include_str!("../../sql/03_ohlc_timeframes.sql")),
    ("04_v_candles.sql", include_str!("../../sql/04_v_candles.sql")),
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store connection lock poisoned")]
    LockPoisoned,

    #[error("invalid stored row: {0}")]
    InvalidRow(String),
}

/// Run schema migrations (idempotent)
pub fn run_schema_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    log::info!("🔧 Running schema migrations");

    let tx = conn.transaction()?;
    for (name, sql) in MIGRATIONS {
        log::debug!("   ├─ Executing: {}", name);
        tx.execute_batch(sql)?;
    }
    tx.commit()?;

    log::info!("✅ Schema migrations completed ({} files)", MIGRATIONS.len());
    Ok(())
}

#[derive(Clone)]
pub struct CandleStore {
    conn: Arc<Mutex<Connection>>,
}

impl CandleStore {
    /// Open (or create) the database file, tune it and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&mut conn)?;

        log::info!("✅ Candle store ready: {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // ------------------------------------------------------------------
    // raw_ohlc
    // ------------------------------------------------------------------

    /// Ingestion watermark: highest stored bar for (symbol, interval, exchange)
    pub fn last_raw_timestamp(
        &self,
        symbol: &str,
        interval: &str,
        exchange: &str,
    ) -> Result<Option<i64>, StoreError> {
        let conn = self.conn()?;
        let ts = conn.query_row(
            "SELECT MAX(timestamp) FROM raw_ohlc
             WHERE symbol = ?1 AND interval = ?2 AND exchange = ?3",
            params![symbol, interval, exchange],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(ts)
    }

    /// Bulk insert in one transaction; returns rows actually written
    pub fn insert_raw_candles(&self, candles: &[RawCandle]) -> Result<usize, StoreError> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO raw_ohlc
                 (timestamp, open, high, low, close, volume, symbol, interval, exchange)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for c in candles {
                inserted += stmt.execute(params![
                    c.timestamp,
                    c.open,
                    c.high,
                    c.low,
                    c.close,
                    c.volume,
                    c.symbol,
                    c.interval,
                    c.exchange,
                ])?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    /// Distinct (symbol, exchange) pairs present at `interval`
    pub fn raw_pairs(&self, interval: &str) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT symbol, exchange FROM raw_ohlc
             WHERE interval = ?1 ORDER BY symbol, exchange",
        )?;
        let pairs = stmt
            .query_map([interval], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    /// Raw rows for one pair strictly after `after`, ascending
    pub fn raw_candles_after(
        &self,
        symbol: &str,
        exchange: &str,
        interval: &str,
        after: Option<i64>,
    ) -> Result<Vec<RawCandle>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, open, high, low, close, volume, symbol, interval, exchange
             FROM raw_ohlc
             WHERE symbol = ?1 AND exchange = ?2 AND interval = ?3 AND timestamp > ?4
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(
                params![symbol, exchange, interval, after.unwrap_or(i64::MIN)],
                |row| {
                    Ok(RawCandle {
                        timestamp: row.get(0)?,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        volume: row.get(5)?,
                        symbol: row.get(6)?,
                        interval: row.get(7)?,
                        exchange: row.get(8)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_raw(&self) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM raw_ohlc", [], |row| row.get(0))?)
    }

    /// Every distinct epoch in `raw_ohlc`
    pub fn distinct_raw_epochs(&self) -> Result<Vec<i64>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT timestamp FROM raw_ohlc ORDER BY timestamp")?;
        let epochs = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(epochs)
    }

    // ------------------------------------------------------------------
    // fact_candles
    // ------------------------------------------------------------------

    /// Transform watermark for one (symbol, exchange)
    pub fn last_fact_timestamp(&self, symbol: &str, exchange: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.conn()?;
        let ts = conn.query_row(
            "SELECT MAX(timestamp) FROM fact_candles WHERE symbol = ?1 AND exchange = ?2",
            params![symbol, exchange],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(ts)
    }

    pub fn insert_fact_candles(&self, candles: &[FactCandle]) -> Result<usize, StoreError> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO fact_candles
                 (timestamp, open, high, low, close, volume, symbol, interval, exchange)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for c in candles {
                inserted += stmt.execute(params![
                    c.timestamp,
                    c.open,
                    c.high,
                    c.low,
                    c.close,
                    c.volume,
                    c.symbol,
                    c.interval,
                    c.exchange,
                ])?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    pub fn fact_pairs(&self) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT symbol, exchange FROM fact_candles ORDER BY symbol, exchange")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    /// Fact rows for one pair strictly after `after`, ascending
    pub fn fact_candles_after(
        &self,
        symbol: &str,
        exchange: &str,
        after: Option<i64>,
    ) -> Result<Vec<FactCandle>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, open, high, low, close, volume, symbol, interval, exchange
             FROM fact_candles
             WHERE symbol = ?1 AND exchange = ?2 AND timestamp > ?3
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(params![symbol, exchange, after.unwrap_or(i64::MIN)], fact_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every fact row, ordered by (symbol, exchange, timestamp)
    pub fn all_fact_candles(&self) -> Result<Vec<FactCandle>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, open, high, low, close, volume, symbol, interval, exchange
             FROM fact_candles
             ORDER BY symbol, exchange, timestamp",
        )?;
        let rows = stmt
            .query_map([], fact_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_facts(&self) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM fact_candles", [], |row| row.get(0))?)
    }

    // ------------------------------------------------------------------
    // dim_time
    // ------------------------------------------------------------------

    pub fn existing_dim_epochs(&self) -> Result<HashSet<i64>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT epoch FROM dim_time")?;
        let epochs = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<i64>, _>>()?;
        Ok(epochs)
    }

    pub fn insert_dim_rows(&self, rows: &[TimeDimensionRow]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO dim_time (
                    epoch, utc_timestamp, date, year, month, day, hour, minute,
                    iso_week, weekday, is_weekend, session,
                    is_london_killzone, is_ny_killzone, is_london_ny_overlap
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for r in rows {
                inserted += stmt.execute(params![
                    r.epoch,
                    r.utc_timestamp.to_rfc3339(),
                    r.date.format("%Y-%m-%d").to_string(),
                    r.year,
                    r.month,
                    r.day,
                    r.hour,
                    r.minute,
                    r.iso_week,
                    r.weekday,
                    r.is_weekend,
                    r.session.as_str(),
                    r.is_london_killzone,
                    r.is_ny_killzone,
                    r.is_london_ny_overlap,
                ])?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    pub fn dim_row(&self, epoch: i64) -> Result<Option<TimeDimensionRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT epoch, utc_timestamp, date, year, month, day, hour, minute,
                    iso_week, weekday, is_weekend, session,
                    is_london_killzone, is_ny_killzone, is_london_ny_overlap
             FROM dim_time WHERE epoch = ?1",
        )?;
        let mut rows = stmt.query([epoch])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let utc: String = row.get(1)?;
        let date: String = row.get(2)?;
        let session: String = row.get(11)?;

        let utc_timestamp = DateTime::parse_from_rfc3339(&utc)
            .map_err(|e| StoreError::InvalidRow(format!("dim_time {} utc_timestamp: {}", epoch, e)))?
            .with_timezone(&Utc);
        let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| StoreError::InvalidRow(format!("dim_time {} date: {}", epoch, e)))?;
        let session = Session::from_str(&session)
            .ok_or_else(|| StoreError::InvalidRow(format!("dim_time {} session '{}'", epoch, session)))?;

        Ok(Some(TimeDimensionRow {
            epoch: row.get(0)?,
            utc_timestamp,
            date,
            year: row.get(3)?,
            month: row.get(4)?,
            day: row.get(5)?,
            hour: row.get(6)?,
            minute: row.get(7)?,
            iso_week: row.get(8)?,
            weekday: row.get(9)?,
            is_weekend: row.get(10)?,
            session,
            is_london_killzone: row.get(12)?,
            is_ny_killzone: row.get(13)?,
            is_london_ny_overlap: row.get(14)?,
        }))
    }

    /// Rows of `v_candles` for one pair, ascending
    ///
    /// Fact rows whose epoch has no dim_time row yet are not returned.
    pub fn session_candles(&self, symbol: &str, exchange: &str) -> Result<Vec<SessionCandle>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, open, high, low, close, volume, symbol, interval, exchange,
                    utc_timestamp, session, is_london_killzone, is_ny_killzone, is_london_ny_overlap
             FROM v_candles
             WHERE symbol = ?1 AND exchange = ?2
             ORDER BY timestamp ASC",
        )?;
        let mut rows = stmt.query(params![symbol, exchange])?;

        let mut candles = Vec::new();
        while let Some(row) = rows.next()? {
            let candle = fact_from_row(row)?;
            let utc: String = row.get(9)?;
            let session: String = row.get(10)?;

            let utc_timestamp = DateTime::parse_from_rfc3339(&utc)
                .map_err(|e| {
                    StoreError::InvalidRow(format!("v_candles {} utc_timestamp: {}", candle.timestamp, e))
                })?
                .with_timezone(&Utc);
            let session = Session::from_str(&session).ok_or_else(|| {
                StoreError::InvalidRow(format!("v_candles {} session '{}'", candle.timestamp, session))
            })?;

            candles.push(SessionCandle {
                candle,
                utc_timestamp,
                session,
                is_london_killzone: row.get(11)?,
                is_ny_killzone: row.get(12)?,
                is_london_ny_overlap: row.get(13)?,
            });
        }
        Ok(candles)
    }

    // ------------------------------------------------------------------
    // ohlc_<tf>
    // ------------------------------------------------------------------

    /// Aggregation watermark: last source timestamp folded for a pair
    pub fn aggregate_watermark(
        &self,
        timeframe: Timeframe,
        symbol: &str,
        exchange: &str,
    ) -> Result<Option<i64>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT MAX(last_ts) FROM {} WHERE symbol = ?1 AND exchange = ?2",
            timeframe.table()
        );
        let ts = conn.query_row(&sql, params![symbol, exchange], |row| row.get::<_, Option<i64>>(0))?;
        Ok(ts)
    }

    /// Existing buckets among `starts`, keyed by bucket_start
    pub fn load_buckets(
        &self,
        timeframe: Timeframe,
        symbol: &str,
        exchange: &str,
        starts: &[i64],
    ) -> Result<HashMap<i64, AggregatedCandle>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT symbol, exchange, bucket_start, open, high, low, close, volume, first_ts, last_ts
             FROM {} WHERE symbol = ?1 AND exchange = ?2 AND bucket_start = ?3",
            timeframe.table()
        );
        let mut stmt = conn.prepare_cached(&sql)?;

        let mut buckets = HashMap::new();
        for &start in starts {
            if let Some(bucket) = stmt
                .query_row(params![symbol, exchange, start], aggregated_from_row)
                .optional()?
            {
                buckets.insert(start, bucket);
            }
        }
        Ok(buckets)
    }

    /// Insert or replace buckets in one transaction
    pub fn upsert_buckets(
        &self,
        timeframe: Timeframe,
        buckets: &[AggregatedCandle],
    ) -> Result<usize, StoreError> {
        if buckets.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "INSERT INTO {} (
                symbol, exchange, bucket_start, open, high, low, close, volume, first_ts, last_ts
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(symbol, exchange, bucket_start) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                first_ts = excluded.first_ts,
                last_ts = excluded.last_ts",
            timeframe.table()
        );

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for b in buckets {
                written += stmt.execute(params![
                    b.symbol,
                    b.exchange,
                    b.bucket_start,
                    b.open,
                    b.high,
                    b.low,
                    b.close,
                    b.volume,
                    b.first_ts,
                    b.last_ts,
                ])?;
            }
        }
        tx.commit()?;

        Ok(written)
    }

    /// Replace a timeframe's whole result set atomically
    pub fn replace_timeframe(
        &self,
        timeframe: Timeframe,
        buckets: &[AggregatedCandle],
    ) -> Result<usize, StoreError> {
        let insert = format!(
            "INSERT INTO {} (
                symbol, exchange, bucket_start, open, high, low, close, volume, first_ts, last_ts
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            timeframe.table()
        );

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {}", timeframe.table()), [])?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(&insert)?;
            for b in buckets {
                written += stmt.execute(params![
                    b.symbol,
                    b.exchange,
                    b.bucket_start,
                    b.open,
                    b.high,
                    b.low,
                    b.close,
                    b.volume,
                    b.first_ts,
                    b.last_ts,
                ])?;
            }
        }
        tx.commit()?;

        Ok(written)
    }

    /// Buckets for one pair ordered by bucket_start
    pub fn aggregated_candles(
        &self,
        timeframe: Timeframe,
        symbol: &str,
        exchange: &str,
    ) -> Result<Vec<AggregatedCandle>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT symbol, exchange, bucket_start, open, high, low, close, volume, first_ts, last_ts
             FROM {} WHERE symbol = ?1 AND exchange = ?2
             ORDER BY bucket_start ASC",
            timeframe.table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![symbol, exchange], aggregated_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rows of the `v_ohlc_<tf>` view for one pair
    pub fn percent_change_view(
        &self,
        timeframe: Timeframe,
        symbol: &str,
        exchange: &str,
    ) -> Result<Vec<PercentChangeRow>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT symbol, exchange, bucket_start, open, high, low, close, volume, first_ts, last_ts,
                    pct_change
             FROM {} WHERE symbol = ?1 AND exchange = ?2
             ORDER BY bucket_start ASC",
            timeframe.view()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![symbol, exchange], |row| {
                Ok(PercentChangeRow {
                    candle: aggregated_from_row(row)?,
                    pct_change: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn fact_from_row(row: &Row<'_>) -> rusqlite::Result<FactCandle> {
    Ok(FactCandle {
        timestamp: row.get(0)?,
        open: row.get(1)?,
        high: row.get(2)?,
        low: row.get(3)?,
        close: row.get(4)?,
        volume: row.get(5)?,
        symbol: row.get(6)?,
        interval: row.get(7)?,
        exchange: row.get(8)?,
    })
}

fn aggregated_from_row(row: &Row<'_>) -> rusqlite::Result<AggregatedCandle> {
    Ok(AggregatedCandle {
        symbol: row.get(0)?,
        exchange: row.get(1)?,
        bucket_start: row.get(2)?,
        open: row.get(3)?,
        high: row.get(4)?,
        low: row.get(5)?,
        close: row.get(6)?,
        volume: row.get(7)?,
        first_ts: row.get(8)?,
        last_ts: row.get(9)?,
    })
}
