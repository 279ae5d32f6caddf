//! # OHLC Pipeline
//!
//! Stages, each re-runnable and idempotent:
//!
//! ```text
//! exchange sources ─> Ingestor ─> raw_ohlc ─> FactTransformer ─> fact_candles
//!                                    │                                │
//!                                    └─> TimeDimensionBuilder         └─> TimeframeAggregator
//!                                         (dim_time)                      (ohlc_1h .. ohlc_1mth,
//!                                                                          v_ohlc_* pct_change)
//! ```
//!
//! **Key Principle:** no stage keeps a watermark of its own. Every watermark is
//! `MAX(...)` over the table the stage extends, so coordination happens entirely
//! through the store and a crash at any point is resumable.
//!
//! ## Module Organization
//!
//! - `types` - Candle records and the time dimension row
//! - `timeframe` - Target timeframes and bucket truncation
//! - `db` - SQLite store and schema migrations
//! - `config` - Environment-driven run configuration
//! - `ingestion` - Concurrent per-pair ingestion
//! - `transform` - raw → fact promotion
//! - `dim_time` - Calendar/session dimension
//! - `aggregation` - Timeframe resampling and percent change

pub mod aggregation;
pub mod config;
pub mod db;
pub mod dim_time;
pub mod ingestion;
pub mod timeframe;
pub mod transform;
pub mod types;

// Re-export commonly used types
pub use aggregation::{percent_changes, resample, AggregationReport, TimeframeAggregator};
pub use config::{ConfigError, PipelineConfig};
pub use db::{CandleStore, StoreError};
pub use dim_time::{DimTimeReport, TimeDimensionBuilder};
pub use ingestion::{IngestError, IngestPair, IngestSummary, Ingestor, PairOutcome};
pub use timeframe::Timeframe;
pub use transform::{FactTransformer, TransformReport};
pub use types::{
    AggregatedCandle, FactCandle, PercentChangeRow, RawCandle, Session, SessionCandle, TimeDimensionRow,
};
