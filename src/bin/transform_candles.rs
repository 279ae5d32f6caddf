//! Promote new 1m raw_ohlc rows into fact_candles
//!
//! Usage:
//!   cargo run --release --bin transform_candles
//!
//! Environment variables:
//!   OHLC_DB_PATH - SQLite database path (required)

use dotenv::dotenv;
use ohlcflow::pipeline::{CandleStore, FactTransformer, PipelineConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    ohlcflow::init_logger();

    let config = PipelineConfig::from_env()?;
    let store = CandleStore::open(&config.db_path)?;

    FactTransformer::new(store).run()?;

    Ok(())
}
