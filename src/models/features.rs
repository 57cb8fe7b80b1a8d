use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{Timeframe, Trend};

/// Indicator values for one timeframe, computed from the latest closed bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeFeatures {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub ema_20: f64,
    pub ema_50: f64,
    pub ema_200: f64,
    pub rsi: f64,
    pub atr: f64,
    pub momentum: f64,
    /// Confirmed swing highs, oldest first.
    pub swing_highs: Vec<f64>,
    /// Confirmed swing lows, oldest first.
    pub swing_lows: Vec<f64>,
    pub volume_spike: bool,
}

impl TimeframeFeatures {
    /// Trend from the moving-average stack.
    pub fn trend(&self) -> Trend {
        let c = self.close;
        if (c > self.ema_20 && self.ema_20 > self.ema_50 && self.ema_50 > self.ema_200)
            || (c > self.ema_50 && self.ema_50 > self.ema_200)
        {
            Trend::Bullish
        } else if (c < self.ema_20 && self.ema_20 < self.ema_50 && self.ema_50 < self.ema_200)
            || (c < self.ema_50 && self.ema_50 < self.ema_200)
        {
            Trend::Bearish
        } else {
            Trend::Neutral
        }
    }

    /// Full stack alignment (price, EMA20, EMA50, EMA200 all ordered).
    pub fn is_strong_trend(&self) -> bool {
        let c = self.close;
        (c > self.ema_20 && self.ema_20 > self.ema_50 && self.ema_50 > self.ema_200)
            || (c < self.ema_20 && self.ema_20 < self.ema_50 && self.ema_50 < self.ema_200)
    }

    pub fn last_swing_high(&self) -> Option<f64> {
        self.swing_highs.last().copied()
    }

    pub fn last_swing_low(&self) -> Option<f64> {
        self.swing_lows.last().copied()
    }
}

/// Per-timeframe features for one pair at one point in time.
///
/// A timeframe whose data could not be fetched is simply absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub pair: String,
    pub as_of: DateTime<Utc>,
    frames: BTreeMap<Timeframe, TimeframeFeatures>,
}

impl FeatureSnapshot {
    pub fn new(pair: &str, as_of: DateTime<Utc>) -> Self {
        Self {
            pair: pair.to_string(),
            as_of,
            frames: BTreeMap::new(),
        }
    }

    pub fn with_frame(mut self, tf: Timeframe, features: TimeframeFeatures) -> Self {
        self.frames.insert(tf, features);
        self
    }

    pub fn insert(&mut self, tf: Timeframe, features: TimeframeFeatures) {
        self.frames.insert(tf, features);
    }

    pub fn get(&self, tf: Timeframe) -> Option<&TimeframeFeatures> {
        self.frames.get(&tf)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn timeframes(&self) -> impl Iterator<Item = Timeframe> + '_ {
        self.frames.keys().copied()
    }

    /// Close of the fastest timeframe present.
    pub fn latest_price(&self) -> Option<f64> {
        Timeframe::ALL
            .iter()
            .rev()
            .find_map(|tf| self.frames.get(tf).map(|f| f.close))
    }
}
