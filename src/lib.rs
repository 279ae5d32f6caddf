//! ohlcflow: incremental OHLC candle pipeline
//!
//! Exchange klines → `raw_ohlc` → `fact_candles` → `ohlc_<tf>`, plus a
//! `dim_time` calendar/session dimension, all in one SQLite file.

pub mod exchange;
pub mod pipeline;
pub mod sqlite_pragma;

use env_logger::{Env, Target};

/// Logger shared by every binary: `RUST_LOG` (default `info`) to stderr
pub fn init_logger() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stderr)
        .init();
}
