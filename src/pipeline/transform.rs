//! Raw → fact promotion
//!
//! Copies finest-interval `raw_ohlc` rows into `fact_candles`. The watermark is
//! `MAX(timestamp)` per (symbol, exchange) in `fact_candles`, so a lagging
//! exchange is never skipped because another one is further ahead.

use super::db::{CandleStore, StoreError};
use super::types::{FactCandle, FINEST_INTERVAL};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransformReport {
    /// Pairs present in the raw store
    pub pairs: usize,
    /// Raw rows past their pair's watermark
    pub selected: usize,
    /// Rows actually written
    pub inserted: usize,
}

impl TransformReport {
    /// Nothing new since the previous run
    pub fn is_empty(&self) -> bool {
        self.selected == 0
    }
}

pub struct FactTransformer {
    store: CandleStore,
}

impl FactTransformer {
    pub fn new(store: CandleStore) -> Self {
        Self { store }
    }

    pub fn run(&self) -> Result<TransformReport, StoreError> {
        log::info!("🔄 Promoting {} raw candles into fact_candles", FINEST_INTERVAL);

        let pairs = self.store.raw_pairs(FINEST_INTERVAL)?;
        let mut report = TransformReport {
            pairs: pairs.len(),
            ..Default::default()
        };

        for (symbol, exchange) in &pairs {
            let watermark = self.store.last_fact_timestamp(symbol, exchange)?;
            let rows = self
                .store
                .raw_candles_after(symbol, exchange, FINEST_INTERVAL, watermark)?;
            if rows.is_empty() {
                continue;
            }

            let facts: Vec<FactCandle> = rows.into_iter().map(FactCandle::from).collect();
            let inserted = self.store.insert_fact_candles(&facts)?;

            log::info!(
                "   ├─ {}@{}: {} selected after {:?}, {} inserted",
                symbol,
                exchange,
                facts.len(),
                watermark,
                inserted
            );

            report.selected += facts.len();
            report.inserted += inserted;
        }

        if report.is_empty() {
            log::info!("💤 No new data for fact_candles");
        } else {
            log::info!(
                "✅ fact_candles: {} inserted ({} selected across {} pairs)",
                report.inserted,
                report.selected,
                report.pairs
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::RawCandle;
    use tempfile::tempdir;

    fn raw(timestamp: i64, interval: &str, exchange: &str) -> RawCandle {
        RawCandle {
            timestamp,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            symbol: "BTCUSDT".to_string(),
            interval: interval.to_string(),
            exchange: exchange.to_string(),
        }
    }

    #[test]
    fn test_only_finest_interval_is_promoted() {
        let dir = tempdir().unwrap();
        let store = CandleStore::open(dir.path().join("ohlc.db")).unwrap();
        store
            .insert_raw_candles(&[raw(60_000, "1m", "binance"), raw(3_600_000, "1h", "binance")])
            .unwrap();

        let report = FactTransformer::new(store.clone()).run().unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(store.count_facts().unwrap(), 1);
    }

    #[test]
    fn test_lagging_exchange_is_not_skipped() {
        let dir = tempdir().unwrap();
        let store = CandleStore::open(dir.path().join("ohlc.db")).unwrap();
        let transformer = FactTransformer::new(store.clone());

        store.insert_raw_candles(&[raw(600_000, "1m", "binance")]).unwrap();
        transformer.run().unwrap();

        // kucoin arrives later with older bars
        store
            .insert_raw_candles(&[raw(60_000, "1m", "kucoin"), raw(120_000, "1m", "kucoin")])
            .unwrap();
        let report = transformer.run().unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(store.last_fact_timestamp("BTCUSDT", "kucoin").unwrap(), Some(120_000));
    }

    #[test]
    fn test_empty_store_is_not_an_error() {
        let dir = tempdir().unwrap();
        let store = CandleStore::open(dir.path().join("ohlc.db")).unwrap();

        let report = FactTransformer::new(store).run().unwrap();

        assert!(report.is_empty());
        assert_eq!(report, TransformReport::default());
    }
}
