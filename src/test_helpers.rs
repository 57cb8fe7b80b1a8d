use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::config::Config;
use crate::core::risk::{Instrument, SizedOrder};
use crate::core::scoring::TradeProposal;
use crate::exchange::news::{Impact, NewsEvent};
use crate::models::{
    Candle, CandleSeries, Direction, FeatureSnapshot, QualityTier, Timeframe, TimeframeFeatures,
};

pub fn make_utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("valid test timestamp")
}

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let base = make_utc(2024, 1, 15, 12, 0);

    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle {
            timestamp: base + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();

    CandleSeries::new(candles)
}

/// `n` one-minute candles whose close moves by `step` each bar.
pub fn trending_candles(start: f64, step: f64, n: usize) -> CandleSeries {
    let data: Vec<(f64, f64, f64, f64)> = (0..n)
        .map(|i| {
            let open = start + i as f64 * step;
            let close = open + step;
            let (hi, lo) = if close >= open { (close, open) } else { (open, close) };
            (open, hi + 0.0001, lo - 0.0001, close)
        })
        .collect();
    make_candles(&data)
}

/// Paper mode with default kill zones and a throwaway log dir.
pub fn default_test_config() -> Config {
    Config {
        log_dir: std::env::temp_dir()
            .join("confluence_scalper_test_logs")
            .to_string_lossy()
            .to_string(),
        ..Config::default()
    }
}

/// Full bullish EMA stack around `price`, RSI 60, higher highs and higher
/// lows that the last bar neither sweeps nor breaks.
pub fn bullish_features(price: f64) -> TimeframeFeatures {
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

pub fn bearish_features(price: f64) -> TimeframeFeatures {
    TimeframeFeatures {
        open: price + 0.0005,
        high: price + 0.0010,
        low: price - 0.0005,
        close: price,
        ema_20: price + 0.0010,
        ema_50: price + 0.0020,
        ema_200: price + 0.0040,
        rsi: 40.0,
        atr: 0.0010,
        momentum: -0.001,
        swing_highs: vec![price + 0.0030, price + 0.0020],
        swing_lows: vec![price - 0.0020, price - 0.0030],
        volume_spike: false,
    }
}

pub fn neutral_features(price: f64) -> TimeframeFeatures {
    TimeframeFeatures {
        open: price,
        high: price + 0.0005,
        low: price - 0.0005,
        close: price,
        ema_20: price,
        ema_50: price,
        ema_200: price,
        rsi: 50.0,
        atr: 0.0010,
        momentum: 0.0,
        swing_highs: vec![price + 0.0020],
        swing_lows: vec![price - 0.0020],
        volume_spike: false,
    }
}

pub fn snapshot_with(
    pair: &str,
    as_of: DateTime<Utc>,
    frames: &[(Timeframe, TimeframeFeatures)],
) -> FeatureSnapshot {
    frames
        .iter()
        .cloned()
        .fold(FeatureSnapshot::new(pair, as_of), |snap, (tf, f)| {
            snap.with_frame(tf, f)
        })
}

pub fn news_event(title: &str, currency: &str, impact: Impact, time: DateTime<Utc>) -> NewsEvent {
    NewsEvent {
        title: title.to_string(),
        currency: currency.to_string(),
        impact,
        time,
    }
}

pub fn sized_order(
    pair: &str,
    direction: Direction,
    entry: f64,
    stop: f64,
    target: f64,
    size: f64,
) -> SizedOrder {
    sized_order_with_quality(pair, direction, entry, stop, target, size, QualityTier::High)
}

pub fn sized_order_with_quality(
    pair: &str,
    direction: Direction,
    entry: f64,
    stop: f64,
    target: f64,
    size: f64,
    quality: QualityTier,
) -> SizedOrder {
    let cfg = default_test_config();
    SizedOrder {
        proposal: TradeProposal {
            direction,
            score: 8,
            quality,
            entry,
            stop,
            target,
            generated_at: make_utc(2024, 1, 15, 9, 0),
            conditions: vec!["Kill Zone Active".to_string()],
        },
        pair: pair.to_string(),
        size,
        risk_multiplier: quality.risk_multiplier(),
        risk_amount: 0.0,
        instrument: Instrument::for_pair(pair, &cfg),
    }
}
