//! Ingest 1m candles from every configured (symbol, exchange) pair into raw_ohlc
//!
//! Usage:
//!   cargo run --release --bin ingest_1m
//!
//! Environment variables:
//!   OHLC_DB_PATH - SQLite database path (required)
//!   OHLC_PAIRS - SYMBOL:exchange list (default: BTCUSDT:binance,BTCUSDT:kucoin)
//!   INGEST_POOL_SIZE - Concurrent pairs (default: 4)
//!   INGEST_MAX_PAGES - Pages per pair per run (default: 1)
//!   RETRY_MAX_ATTEMPTS / RETRY_BACKOFF_MS - Per-call retry (default: 3 / 2000)
//!
//! Exits non-zero if any pair failed; the other pairs are still committed.

use dotenv::dotenv;
use log::{error, info};
use ohlcflow::exchange::{build_registry, http_client};
use ohlcflow::pipeline::{CandleStore, Ingestor, PipelineConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    ohlcflow::init_logger();

    let config = PipelineConfig::from_env()?;

    info!("🚀 ingest_1m");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Pairs: {}", config.pairs.len());
    info!("   └─ Retry: {} attempts, {:?} backoff", config.retry.max_attempts, config.retry.backoff);

    let store = CandleStore::open(&config.db_path)?;
    let client = http_client(&config.timeouts)?;
    let sources = build_registry(&client, &config.endpoints, config.retry);

    let ingestor = Ingestor::new(store, sources, config.pool_size).with_max_pages(config.max_pages);
    let summary = ingestor.run(&config.pairs).await;

    if !summary.all_succeeded() {
        error!("❌ {} of {} pairs failed", summary.failed(), summary.reports.len());
        return Err(format!("{} pair(s) failed to ingest", summary.failed()).into());
    }

    Ok(())
}
