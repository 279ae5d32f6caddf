//! Calendar / session dimension
//!
//! One `dim_time` row per distinct `raw_ohlc.timestamp`. Each row is a pure
//! function of its epoch, so the builder only derives the set difference
//! between raw epochs and epochs already present.
//!
//! Hour windows (UTC, half-open):
//!
//! | flag                   | hours    |
//! |------------------------|----------|
//! | `is_london_killzone`   | [7, 10)  |
//! | `is_ny_killzone`       | [12, 15) |
//! | `is_london_ny_overlap` | [13, 16) |
//!
//! Sessions come from [`Session::from_utc_hour`].

use super::db::{CandleStore, StoreError};
use super::types::{Session, TimeDimensionRow};
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Epochs above this are milliseconds, at or below are seconds
pub const MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// Epoch of either magnitude → UTC instant, keeping sub-second millis
pub fn epoch_to_utc(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch > MILLIS_THRESHOLD {
        DateTime::<Utc>::from_timestamp_millis(epoch)
    } else {
        DateTime::<Utc>::from_timestamp(epoch, 0)
    }
}

pub fn is_london_killzone(hour: u32) -> bool {
    (7..10).contains(&hour)
}

pub fn is_ny_killzone(hour: u32) -> bool {
    (12..15).contains(&hour)
}

pub fn is_london_ny_overlap(hour: u32) -> bool {
    (13..16).contains(&hour)
}

/// Derive the dimension row for one raw epoch
///
/// Returns None if the epoch is outside chrono's representable range.
pub fn derive_row(epoch: i64) -> Option<TimeDimensionRow> {
    let utc_timestamp = epoch_to_utc(epoch)?;
    let hour = utc_timestamp.hour();
    let weekday = utc_timestamp.weekday().num_days_from_monday();

    Some(TimeDimensionRow {
        epoch,
        utc_timestamp,
        date: utc_timestamp.date_naive(),
        year: utc_timestamp.year(),
        month: utc_timestamp.month(),
        day: utc_timestamp.day(),
        hour,
        minute: utc_timestamp.minute(),
        iso_week: utc_timestamp.iso_week().week(),
        weekday,
        is_weekend: weekday >= 5,
        session: Session::from_utc_hour(hour),
        is_london_killzone: is_london_killzone(hour),
        is_ny_killzone: is_ny_killzone(hour),
        is_london_ny_overlap: is_london_ny_overlap(hour),
    })
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DimTimeReport {
    /// Distinct epochs in raw_ohlc
    pub raw_epochs: usize,
    /// Epochs with no dim_time row before this run
    pub missing: usize,
    pub inserted: usize,
    /// Epochs chrono could not represent
    pub skipped: usize,
}

pub struct TimeDimensionBuilder {
    store: CandleStore,
}

impl TimeDimensionBuilder {
    pub fn new(store: CandleStore) -> Self {
        Self { store }
    }

    pub fn run(&self) -> Result<DimTimeReport, StoreError> {
        log::info!("🕒 Building dim_time");

        let raw_epochs = self.store.distinct_raw_epochs()?;
        let existing = self.store.existing_dim_epochs()?;

        let missing: Vec<i64> = raw_epochs
            .iter()
            .copied()
            .filter(|epoch| !existing.contains(epoch))
            .collect();

        let mut report = DimTimeReport {
            raw_epochs: raw_epochs.len(),
            missing: missing.len(),
            ..Default::default()
        };

        if missing.is_empty() {
            log::info!("💤 dim_time up to date ({} epochs)", raw_epochs.len());
            return Ok(report);
        }

        let mut rows = Vec::with_capacity(missing.len());
        for epoch in missing {
            match derive_row(epoch) {
                Some(row) => rows.push(row),
                None => {
                    log::warn!("⚠️  Skipping unrepresentable epoch {}", epoch);
                    report.skipped += 1;
                }
            }
        }

        report.inserted = self.store.insert_dim_rows(&rows)?;

        log::info!(
            "✅ dim_time: {} inserted ({} raw epochs, {} skipped)",
            report.inserted,
            report.raw_epochs,
            report.skipped
        );

        Ok(report)
    }
}
