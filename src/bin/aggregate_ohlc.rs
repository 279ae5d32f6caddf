//! Resample fact_candles into ohlc_1h / 4h / 1d / 1w / 1mth
//!
//! Usage:
//!   cargo run --release --bin aggregate_ohlc              # incremental
//!   cargo run --release --bin aggregate_ohlc -- --rebuild # full recompute
//!
//! Environment variables:
//!   OHLC_DB_PATH - SQLite database path (required)
//!   OHLC_TIMEFRAMES - Target timeframes (default: 1h,4h,1d,1w,1mth)

use dotenv::dotenv;
use log::info;
use ohlcflow::pipeline::{CandleStore, PipelineConfig, TimeframeAggregator};
use std::env;

fn rebuild_requested() -> bool {
    env::args().any(|arg| arg == "--rebuild")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    ohlcflow::init_logger();

    let config = PipelineConfig::from_env()?;
    let store = CandleStore::open(&config.db_path)?;
    let aggregator = TimeframeAggregator::new(store, config.timeframes);

    let report = if rebuild_requested() {
        aggregator.rebuild()?
    } else {
        aggregator.run_incremental()?
    };

    info!("✅ {} buckets written", report.buckets_written());
    Ok(())
}
