//! Derive dim_time rows for raw_ohlc epochs that have none yet
//!
//! Usage:
//!   cargo run --release --bin build_dim_time
//!
//! Environment variables:
//!   OHLC_DB_PATH - SQLite database path (required)

use dotenv::dotenv;
use ohlcflow::pipeline::{CandleStore, PipelineConfig, TimeDimensionBuilder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    ohlcflow::init_logger();

    let config = PipelineConfig::from_env()?;
    let store = CandleStore::open(&config.db_path)?;

    TimeDimensionBuilder::new(store).run()?;

    Ok(())
}
