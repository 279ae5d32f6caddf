//! Multi-timeframe OHLC resampling
//!
//! Two modes over `fact_candles`:
//!
//! - **Incremental** (default): per timeframe and (symbol, exchange), fold fact
//!   rows newer than `MAX(last_ts)` into the buckets they touch and upsert only
//!   those buckets. Cost follows new data, not history.
//! - **Rebuild**: clear each `ohlc_<tf>` table and recompute it from every fact
//!   row. Needed only when fact rows arrive older than a pair's aggregate
//!   watermark (late history), which incremental mode never revisits.
//!
//! Both use the same ordered fold ([`AggregatedCandle::fold`]), so for the same
//! fact set they produce identical buckets.

use super::db::{CandleStore, StoreError};
use super::timeframe::Timeframe;
use super::types::{AggregatedCandle, FactCandle, PercentChangeRow};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Resample fact rows into `timeframe` buckets
///
/// Input order does not matter; rows are folded in (symbol, exchange, timestamp)
/// order. Output is ordered by (symbol, exchange, bucket_start).
pub fn resample(timeframe: Timeframe, facts: &[FactCandle]) -> Vec<AggregatedCandle> {
    let mut ordered: Vec<&FactCandle> = facts.iter().collect();
    ordered.sort_by(|a, b| {
        (&a.symbol, &a.exchange, a.timestamp).cmp(&(&b.symbol, &b.exchange, b.timestamp))
    });

    let mut buckets: BTreeMap<(String, String, i64), AggregatedCandle> = BTreeMap::new();
    for fact in ordered {
        let Some(start) = timeframe.bucket_start(fact.timestamp) else {
            log::warn!("⚠️  Unbucketable timestamp {} for {}@{}", fact.timestamp, fact.symbol, fact.exchange);
            continue;
        };

        buckets
            .entry((fact.symbol.clone(), fact.exchange.clone(), start))
            .and_modify(|bucket| bucket.fold(fact))
            .or_insert_with(|| AggregatedCandle::open_bucket(start, fact));
    }

    buckets.into_values().collect()
}

/// Close-to-close change against the previous bucket of the same pair
///
/// The first bucket of each (symbol, exchange) and any bucket whose predecessor
/// closed at zero get `None`.
pub fn percent_changes(candles: &[AggregatedCandle]) -> Vec<PercentChangeRow> {
    let mut ordered: Vec<&AggregatedCandle> = candles.iter().collect();
    ordered.sort_by(|a, b| {
        (&a.symbol, &a.exchange, a.bucket_start).cmp(&(&b.symbol, &b.exchange, b.bucket_start))
    });

    let mut rows = Vec::with_capacity(ordered.len());
    let mut previous: Option<&AggregatedCandle> = None;

    for candle in ordered {
        let pct_change = previous
            .filter(|prev| prev.symbol == candle.symbol && prev.exchange == candle.exchange)
            .and_then(|prev| {
                if prev.close == 0.0 {
                    None
                } else {
                    Some((candle.close - prev.close) / prev.close)
                }
            });

        rows.push(PercentChangeRow {
            candle: candle.clone(),
            pct_change,
        });
        previous = Some(candle);
    }

    rows
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeframeReport {
    pub timeframe: Timeframe,
    /// Pairs with new fact rows
    pub pairs: usize,
    /// Fact rows folded
    pub folded: usize,
    /// Buckets written
    pub buckets: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregationReport {
    pub timeframes: Vec<TimeframeReport>,
}

impl AggregationReport {
    pub fn buckets_written(&self) -> usize {
        self.timeframes.iter().map(|t| t.buckets).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.timeframes.iter().all(|t| t.folded == 0)
    }
}

pub struct TimeframeAggregator {
    store: CandleStore,
    timeframes: Vec<Timeframe>,
}

impl TimeframeAggregator {
    pub fn new(store: CandleStore, timeframes: Vec<Timeframe>) -> Self {
        Self { store, timeframes }
    }

    /// Fold new fact rows into every configured timeframe
    pub fn run_incremental(&self) -> Result<AggregationReport, StoreError> {
        log::info!(
            "📈 Aggregating {} timeframes (incremental)",
            self.timeframes.len()
        );

        let pairs = self.store.fact_pairs()?;
        let mut report = AggregationReport::default();

        for &timeframe in &self.timeframes {
            let mut tf_report = TimeframeReport {
                timeframe,
                pairs: 0,
                folded: 0,
                buckets: 0,
            };

            for (symbol, exchange) in &pairs {
                let (folded, buckets) = self.fold_pair(timeframe, symbol, exchange)?;
                if folded > 0 {
                    tf_report.pairs += 1;
                    tf_report.folded += folded;
                    tf_report.buckets += buckets;
                }
            }

            log_timeframe(&tf_report);
            report.timeframes.push(tf_report);
        }

        if report.is_empty() {
            log::info!("💤 No new fact rows to aggregate");
        }
        Ok(report)
    }

    /// Fold one pair's new fact rows into `timeframe`; returns (rows folded, buckets written)
    fn fold_pair(
        &self,
        timeframe: Timeframe,
        symbol: &str,
        exchange: &str,
    ) -> Result<(usize, usize), StoreError> {
        let watermark = self.store.aggregate_watermark(timeframe, symbol, exchange)?;
        let facts = self.store.fact_candles_after(symbol, exchange, watermark)?;
        if facts.is_empty() {
            return Ok((0, 0));
        }

        let keyed: Vec<(i64, &FactCandle)> = facts
            .iter()
            .filter_map(|fact| timeframe.bucket_start(fact.timestamp).map(|start| (start, fact)))
            .collect();

        let starts: Vec<i64> = keyed
            .iter()
            .map(|(start, _)| *start)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut buckets: HashMap<i64, AggregatedCandle> =
            self.store.load_buckets(timeframe, symbol, exchange, &starts)?;

        // facts are ascending by timestamp
        for (start, fact) in &keyed {
            buckets
                .entry(*start)
                .and_modify(|bucket| bucket.fold(fact))
                .or_insert_with(|| AggregatedCandle::open_bucket(*start, fact));
        }

        let touched: Vec<AggregatedCandle> = starts
            .iter()
            .filter_map(|start| buckets.remove(start))
            .collect();
        let written = self.store.upsert_buckets(timeframe, &touched)?;

        log::debug!(
            "   ├─ {} {}@{}: {} rows after {:?} → {} buckets",
            timeframe.as_str(),
            symbol,
            exchange,
            keyed.len(),
            watermark,
            written
        );

        Ok((keyed.len(), written))
    }

    /// Recompute every configured timeframe from all fact rows
    pub fn rebuild(&self) -> Result<AggregationReport, StoreError> {
        log::info!("📈 Rebuilding {} timeframes from scratch", self.timeframes.len());

        let facts = self.store.all_fact_candles()?;
        let pairs: BTreeSet<(&str, &str)> = facts
            .iter()
            .map(|f| (f.symbol.as_str(), f.exchange.as_str()))
            .collect();

        let mut report = AggregationReport::default();
        for &timeframe in &self.timeframes {
            let buckets = resample(timeframe, &facts);
            let written = self.store.replace_timeframe(timeframe, &buckets)?;

            let tf_report = TimeframeReport {
                timeframe,
                pairs: pairs.len(),
                folded: facts.len(),
                buckets: written,
            };
            log_timeframe(&tf_report);
            report.timeframes.push(tf_report);
        }

        Ok(report)
    }

    /// Stored buckets for one pair with their percent change
    pub fn percent_change_series(
        &self,
        timeframe: Timeframe,
        symbol: &str,
        exchange: &str,
    ) -> Result<Vec<PercentChangeRow>, StoreError> {
        let candles = self.store.aggregated_candles(timeframe, symbol, exchange)?;
        Ok(percent_changes(&candles))
    }
}

fn log_timeframe(report: &TimeframeReport) {
    if report.folded == 0 {
        log::info!("   ├─ {}: up to date", report.timeframe.as_str());
    } else {
        log::info!(
            "   ├─ {}: {} rows from {} pairs → {} buckets",
            report.timeframe.as_str(),
            report.folded,
            report.pairs,
            report.buckets
        );
    }
}
