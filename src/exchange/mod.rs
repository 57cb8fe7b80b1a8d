pub mod historical;
pub mod news;
pub mod yahoo;

pub use historical::HistoricalFeed;
pub use news::{ForexFactoryFeed, NewsEvent, NewsFeed, StaticNewsFeed};
pub use yahoo::YahooFeed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::indicators::build_features;
use crate::error::{EngineError, Result};
use crate::models::{CandleSeries, FeatureSnapshot, Timeframe};

#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Oldest-first candles for `pair`, at most `limit` of them.
    async fn fetch_candles(&mut self, pair: &str, tf: Timeframe, limit: usize) -> Result<CandleSeries>;

    async fn latest_price(&mut self, pair: &str) -> Result<f64> {
        let series = self.fetch_candles(pair, Timeframe::M1, 1).await?;
        series
            .last()
            .map(|c| c.close)
            .ok_or_else(|| EngineError::DataUnavailable(format!("no price for {}", pair)))
    }
}

/// Indicator snapshot across `timeframes`. A timeframe that fails or comes
/// back empty is left out; only a snapshot with no timeframes at all is an error.
pub async fn snapshot(
    feed: &mut dyn MarketFeed,
    pair: &str,
    timeframes: &[Timeframe],
    now: DateTime<Utc>,
    limit: usize,
) -> Result<FeatureSnapshot> {
    let mut snap = FeatureSnapshot::new(pair, now);

    for &tf in timeframes {
        match feed.fetch_candles(pair, tf, limit).await {
            Ok(series) => match build_features(&series) {
                Some(features) => snap.insert(tf, features),
                None => debug!("{} {}: no candles", pair, tf),
            },
            Err(e) => debug!("{} {}: skipped ({})", pair, tf, e),
        }
    }

    if snap.is_empty() {
        return Err(EngineError::DataUnavailable(format!(
            "no market data for {}",
            pair
        )));
    }
    Ok(snap)
}
