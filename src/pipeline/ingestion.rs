//! Raw candle ingestion
//!
//! One task per (symbol, exchange) pair, bounded by a semaphore. Each task:
//! 1. Reads its watermark (`MAX(timestamp)` in `raw_ohlc`)
//! 2. Fetches one page strictly after it (retries live in the source)
//! 3. Bulk-inserts with INSERT OR IGNORE
//!
//! A failing pair is reported, never propagated to its siblings.

use super::db::{CandleStore, StoreError};
use crate::exchange::{CandleSource, FetchError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IngestPair {
    pub symbol: String,
    pub exchange: String,
}

impl IngestPair {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
        }
    }
}

impl fmt::Display for IngestPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.exchange)
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no candle source registered for exchange '{0}'")]
    UnknownExchange(String),

    #[error("ingestion task failed: {0}")]
    Task(String),
}

/// Successful outcome for one pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    /// At least one bar came back. `inserted < fetched` means some were already stored.
    Inserted {
        fetched: usize,
        inserted: usize,
        pages: usize,
    },
    /// Upstream returned nothing after the watermark
    NoNewData,
}

impl PairOutcome {
    pub fn inserted(&self) -> usize {
        match self {
            PairOutcome::Inserted { inserted, .. } => *inserted,
            PairOutcome::NoNewData => 0,
        }
    }
}

#[derive(Debug)]
pub struct PairReport {
    pub pair: IngestPair,
    pub result: Result<PairOutcome, IngestError>,
}

/// Partial-success summary of one ingestion run, in input order
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub reports: Vec<PairReport>,
}

impl IngestSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.result.is_err()).count()
    }

    pub fn inserted_total(&self) -> usize {
        self.reports
            .iter()
            .filter_map(|r| r.result.as_ref().ok())
            .map(PairOutcome::inserted)
            .sum()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

pub struct Ingestor {
    store: CandleStore,
    sources: HashMap<&'static str, Arc<dyn CandleSource>>,
    pool_size: usize,
    max_pages: usize,
}

impl Ingestor {
    pub fn new(store: CandleStore, sources: Vec<Arc<dyn CandleSource>>, pool_size: usize) -> Self {
        let sources = sources
            .into_iter()
            .map(|source| (source.exchange(), source))
            .collect();

        Self {
            store,
            sources,
            pool_size: pool_size.max(1),
            max_pages: 1,
        }
    }

    /// Pages fetched per pair before yielding (default 1)
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Ingest every pair concurrently, at most `pool_size` at a time
    pub async fn run(&self, pairs: &[IngestPair]) -> IngestSummary {
        log::info!(
            "🚀 Starting ingestion: {} pairs (pool size {}, max pages {})",
            pairs.len(),
            self.pool_size,
            self.max_pages
        );

        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut pending = Vec::with_capacity(pairs.len());

        for pair in pairs {
            let Some(source) = self.sources.get(pair.exchange.as_str()).cloned() else {
                pending.push((pair.clone(), None));
                continue;
            };

            let store = self.store.clone();
            let semaphore = semaphore.clone();
            let task_pair = pair.clone();
            let max_pages = self.max_pages;

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| IngestError::Task(e.to_string()))?;
                ingest_pair(&store, source.as_ref(), &task_pair, max_pages).await
            });
            pending.push((pair.clone(), Some(handle)));
        }

        let mut summary = IngestSummary::default();
        for (pair, handle) in pending {
            let result = match handle {
                None => Err(IngestError::UnknownExchange(pair.exchange.clone())),
                Some(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(IngestError::Task(e.to_string())),
                },
            };

            match &result {
                Ok(PairOutcome::Inserted {
                    fetched,
                    inserted,
                    pages,
                }) => log::info!(
                    "✅ [{}] fetched {} bars over {} page(s), inserted {}",
                    pair,
                    fetched,
                    pages,
                    inserted
                ),
                Ok(PairOutcome::NoNewData) => log::info!("💤 [{}] no new data", pair),
                Err(e) => log::error!("❌ [{}] ingestion failed: {}", pair, e),
            }

            summary.reports.push(PairReport { pair, result });
        }

        log::info!(
            "📊 Ingestion complete: {} succeeded, {} failed, {} rows inserted",
            summary.succeeded(),
            summary.failed(),
            summary.inserted_total()
        );

        summary
    }
}

/// Fetch and store up to `max_pages` pages for one pair
///
/// The watermark is re-read before every page, so a crash at any point
/// resumes from what is durably stored.
pub async fn ingest_pair(
    store: &CandleStore,
    source: &dyn CandleSource,
    pair: &IngestPair,
    max_pages: usize,
) -> Result<PairOutcome, IngestError> {
    let mut fetched = 0;
    let mut inserted = 0;
    let mut pages = 0;

    for _ in 0..max_pages.max(1) {
        let watermark = store.last_raw_timestamp(&pair.symbol, source.interval(), &pair.exchange)?;
        log::debug!("🔍 [{}] watermark {:?}", pair, watermark);

        let candles = source.fetch_candles(&pair.symbol, watermark).await?;
        pages += 1;
        if candles.is_empty() {
            break;
        }

        let written = store.insert_raw_candles(&candles)?;
        fetched += candles.len();
        inserted += written;

        if written < candles.len() {
            log::debug!(
                "   ├─ [{}] {} bars already stored",
                pair,
                candles.len() - written
            );
        }
        if written == 0 {
            break;
        }
    }

    if fetched == 0 {
        Ok(PairOutcome::NoNewData)
    } else {
        Ok(PairOutcome::Inserted {
            fetched,
            inserted,
            pages,
        })
    }
}
