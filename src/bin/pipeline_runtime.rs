//! Pipeline Runtime - every stage in one process
//!
//! Order: ingest → transform → dim_time → aggregate. A failed ingestion pair
//! does not stop the later stages (they work off whatever is stored), but the
//! process still exits non-zero at the end.
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime
//!
//! Environment variables: see `PipelineConfig::from_env`.

use dotenv::dotenv;
use log::{error, info};
use ohlcflow::exchange::{build_registry, http_client};
use ohlcflow::pipeline::{
    CandleStore, FactTransformer, Ingestor, PipelineConfig, TimeDimensionBuilder, TimeframeAggregator,
};
use std::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    ohlcflow::init_logger();

    // Fail fast before any network or store activity
    let config = PipelineConfig::from_env()?;
    let started = Instant::now();

    info!("🚀 Pipeline Runtime");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Pairs: {}", config.pairs.len());
    info!(
        "   └─ Timeframes: {}",
        config
            .timeframes
            .iter()
            .map(|tf| tf.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let store = CandleStore::open(&config.db_path)?;

    // Stage 1: ingest
    let client = http_client(&config.timeouts)?;
    let sources = build_registry(&client, &config.endpoints, config.retry);
    let summary = Ingestor::new(store.clone(), sources, config.pool_size)
        .with_max_pages(config.max_pages)
        .run(&config.pairs)
        .await;

    // Stage 2: raw -> fact
    let transform = FactTransformer::new(store.clone()).run()?;

    // Stage 3: time dimension
    let dim = TimeDimensionBuilder::new(store.clone()).run()?;

    // Stage 4: timeframes
    let aggregation = TimeframeAggregator::new(store, config.timeframes).run_incremental()?;

    info!("📊 Pipeline complete in {:.2}s", started.elapsed().as_secs_f64());
    info!(
        "   ├─ raw_ohlc: {} inserted ({} ok / {} failed pairs)",
        summary.inserted_total(),
        summary.succeeded(),
        summary.failed()
    );
    info!("   ├─ fact_candles: {} inserted", transform.inserted);
    info!("   ├─ dim_time: {} inserted", dim.inserted);
    info!("   └─ ohlc_*: {} buckets written", aggregation.buckets_written());

    if !summary.all_succeeded() {
        error!("❌ {} ingestion pair(s) failed", summary.failed());
        return Err(format!("{} pair(s) failed to ingest", summary.failed()).into());
    }

    Ok(())
}
