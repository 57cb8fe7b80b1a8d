#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};

use confluence_scalper::config::Config;
use confluence_scalper::error::{EngineError, Result};
use confluence_scalper::exchange::MarketFeed;
use confluence_scalper::models::{Candle, CandleSeries, Timeframe, TimeframeFeatures};

pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap()
}

/// Paper config for `pairs` with its own log dir under the temp dir.
pub fn test_config(pairs: &[&str], tag: &str) -> Config {
    Config {
        pairs: pairs.iter().map(|p| p.to_string()).collect(),
        log_dir: std::env::temp_dir()
            .join(format!("confluence_scalper_it_{}_{}", tag, std::process::id()))
            .to_string_lossy()
            .to_string(),
        ..Config::default()
    }
}

/// `n` one-minute candles rising +3 / -2 tenths of a pip in turn from `start`,
/// ending at 2024-01-15 07:59. RSI settles near 60 and no swing points form.
/// With `volume_spike` the last bar trades five times the usual volume.
pub fn zigzag_uptrend(n: usize, start: f64, volume_spike: bool) -> Vec<Candle> {
    let end = utc(2024, 1, 15, 7, 59);
    let mut candles = Vec::with_capacity(n);
    let mut prev = start;
    for i in 0..n {
        let close = if i == 0 {
            start
        } else if i % 2 == 1 {
            prev + 0.0003
        } else {
            prev - 0.0002
        };
        let (hi, lo) = if close >= prev { (close, prev) } else { (prev, close) };
        candles.push(Candle {
            timestamp: end - Duration::minutes((n - 1 - i) as i64),
            open: prev,
            high: hi + 0.00005,
            low: lo - 0.00005,
            close,
            volume: if volume_spike && i == n - 1 { 500.0 } else { 100.0 },
        });
        prev = close;
    }
    candles
}

/// Serves one candle series for every pair and timeframe. Pairs listed in
/// `failing` error out; `price` overrides the latest price once set.
pub struct MockFeed {
    pub series: CandleSeries,
    pub failing: Arc<Mutex<Vec<String>>>,
    pub price: Arc<Mutex<Option<f64>>>,
}

impl MockFeed {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            series: CandleSeries::new(candles),
            failing: Arc::new(Mutex::new(Vec::new())),
            price: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing_for(self, pairs: &[&str]) -> Self {
        *self.failing.lock().unwrap() = pairs.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn last_close(&self) -> f64 {
        self.series.last().unwrap().close
    }
}

#[async_trait]
impl MarketFeed for MockFeed {
    async fn fetch_candles(&mut self, pair: &str, _tf: Timeframe, limit: usize) -> Result<CandleSeries> {
        if self.failing.lock().unwrap().iter().any(|p| p == pair) {
            return Err(EngineError::DataUnavailable(format!("{} feed down", pair)));
        }
        Ok(self.series.tail(limit))
    }

    async fn latest_price(&mut self, pair: &str) -> Result<f64> {
        let overridden = *self.price.lock().unwrap();
        if let Some(price) = overridden {
            return Ok(price);
        }
        let series = self.fetch_candles(pair, Timeframe::M1, 1).await?;
        Ok(series.last().unwrap().close)
    }
}

/// EMA stack fully bullish around `price`.
pub fn bullish_frame(price: f64) -> TimeframeFeatures {
    TimeframeFeatures {
        open: price - 0.0005,
        high: price + 0.0005,
        low: price - 0.0010,
        close: price,
        ema_20: price - 0.0010,
        ema_50: price - 0.0020,
        ema_200: price - 0.0040,
        rsi: 60.0,
        atr: 0.0010,
        momentum: 0.001,
        swing_highs: vec![price + 0.0020, price + 0.0030],
        swing_lows: vec![price - 0.0030, price - 0.0020],
        volume_spike: false,
    }
}
