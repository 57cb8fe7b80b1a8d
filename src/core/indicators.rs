use crate::models::{CandleSeries, TimeframeFeatures};

pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const MOMENTUM_PERIOD: usize = 5;
pub const SWING_WINDOW: usize = 3;
pub const VOLUME_LOOKBACK: usize = 20;
pub const VOLUME_SPIKE_FACTOR: f64 = 1.5;

/// Exponential moving average of `values`, seeded with the first value.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    let first = *values.first()?;
    let alpha = 2.0 / (period as f64 + 1.0);
    Some(
        values[1..]
            .iter()
            .fold(first, |acc, v| alpha * v + (1.0 - alpha) * acc),
    )
}

/// Wilder RSI. Neutral 50 until `period + 1` closes are available.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() <= period {
        return 50.0;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let mut avg_gain = changes[..period].iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss =
        changes[..period].iter().filter(|c| **c < 0.0).map(|c| -c).sum::<f64>() / period as f64;

    for change in &changes[period..] {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Wilder ATR for every bar from the first full period onwards.
pub fn atr_series(candles: &CandleSeries, period: usize) -> Vec<f64> {
    if period == 0 || candles.len() <= period {
        return Vec::new();
    }

    let tr: Vec<f64> = (1..candles.len())
        .map(|i| {
            let c = &candles[i];
            let prev_close = candles[i - 1].close;
            c.total_range()
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs())
        })
        .collect();

    let mut out = Vec::with_capacity(tr.len() - period + 1);
    let mut atr = tr[..period].iter().sum::<f64>() / period as f64;
    out.push(atr);
    for value in &tr[period..] {
        atr = (atr * (period as f64 - 1.0) + value) / period as f64;
        out.push(atr);
    }
    out
}

/// Fractional change over the last `period` closes.
pub fn momentum(closes: &[f64], period: usize) -> f64 {
    if closes.len() <= period {
        return 0.0;
    }
    let then = closes[closes.len() - 1 - period];
    if then == 0.0 {
        return 0.0;
    }
    closes[closes.len() - 1] / then - 1.0
}

/// Confirmed swing highs and lows (oldest first): the extreme of a centred
/// window of `window` bars on each side.
pub fn swing_points(candles: &CandleSeries, window: usize) -> (Vec<f64>, Vec<f64>) {
    let len = candles.len();
    let mut highs = Vec::new();
    let mut lows = Vec::new();
    if len <= window * 2 {
        return (highs, lows);
    }

    for i in window..(len - window) {
        let range = (i - window)..=(i + window);

        let current_high = candles[i].high;
        if range.clone().all(|j| candles[j].high <= current_high) {
            highs.push(current_high);
        }

        let current_low = candles[i].low;
        if range.clone().all(|j| candles[j].low >= current_low) {
            lows.push(current_low);
        }
    }

    (highs, lows)
}

/// Last bar's volume exceeds `factor` times the mean of the preceding `lookback` bars.
pub fn volume_spike(volumes: &[f64], lookback: usize, factor: f64) -> bool {
    let Some((last, prior)) = volumes.split_last() else {
        return false;
    };
    let window = &prior[prior.len().saturating_sub(lookback)..];
    if window.is_empty() {
        return false;
    }
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    mean > 0.0 && *last > mean * factor
}

/// Reduce a candle series to the indicator record the scorer consumes.
pub fn build_features(candles: &CandleSeries) -> Option<TimeframeFeatures> {
    let last = candles.last()?;
    let closes = candles.closes();

    let atr = atr_series(candles, ATR_PERIOD)
        .last()
        .copied()
        .unwrap_or_else(|| candles.iter().map(|c| c.total_range()).sum::<f64>() / candles.len() as f64);
    let (swing_highs, swing_lows) = swing_points(candles, SWING_WINDOW);

    Some(TimeframeFeatures {
        open: last.open,
        high: last.high,
        low: last.low,
        close: last.close,
        ema_20: ema(&closes, 20)?,
        ema_50: ema(&closes, 50)?,
        ema_200: ema(&closes, 200)?,
        rsi: rsi(&closes, RSI_PERIOD),
        atr,
        momentum: momentum(&closes, MOMENTUM_PERIOD),
        swing_highs,
        swing_lows,
        volume_spike: volume_spike(&candles.volumes(), VOLUME_LOOKBACK, VOLUME_SPIKE_FACTOR),
    })
}
