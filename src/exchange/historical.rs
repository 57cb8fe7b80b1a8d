use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::Result;
use crate::exchange::MarketFeed;
use crate::models::{Candle, CandleSeries, Timeframe};

/// Replays pre-loaded candles. Only candles stamped at or before the cursor
/// (`now`) are visible, simulating a forward walk.
pub struct HistoricalFeed {
    data: HashMap<(String, Timeframe), CandleSeries>,
    now: DateTime<Utc>,
}

impl Default for HistoricalFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoricalFeed {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            now: Utc::now(),
        }
    }

    /// Candles must be sorted oldest-first.
    pub fn load(&mut self, pair: &str, tf: Timeframe, candles: Vec<Candle>) {
        self.data
            .insert((pair.to_string(), tf), CandleSeries::new(candles));
    }

    pub fn set_time(&mut self, t: DateTime<Utc>) {
        self.now = t;
    }

    pub fn latest_time(&self) -> Option<DateTime<Utc>> {
        self.data
            .values()
            .filter_map(|s| s.last().map(|c| c.timestamp))
            .max()
    }
}

#[async_trait]
impl MarketFeed for HistoricalFeed {
    async fn fetch_candles(&mut self, pair: &str, tf: Timeframe, limit: usize) -> Result<CandleSeries> {
        Ok(self
            .data
            .get(&(pair.to_string(), tf))
            .map(|s| s.until(self.now, limit))
            .unwrap_or_default())
    }
}
