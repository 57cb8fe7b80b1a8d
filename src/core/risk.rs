use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::core::kill_zones::pair_currencies;
use crate::core::scoring::TradeProposal;
use crate::error::{EngineError, Result};
use crate::models::{GateDecision, QualityTier, VolatilityTier};

pub const HIGH_VOLATILITY_RATIO: f64 = 1.3;
pub const LOW_VOLATILITY_RATIO: f64 = 0.7;

/// Price unit metadata for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub price_increment: f64,
    pub value_per_increment: f64,
}

impl Instrument {
    /// JPY-quoted pairs trade in increments 100x larger.
    pub fn for_pair(pair: &str, cfg: &Config) -> Self {
        let (_, quote) = pair_currencies(pair);
        let scale = if quote == "JPY" { 100.0 } else { 1.0 };
        Self {
            price_increment: cfg.price_increment * scale,
            value_per_increment: cfg.value_per_increment,
        }
    }

    pub fn increments(&self, price_distance: f64) -> f64 {
        price_distance / self.price_increment
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub capital: f64,
    pub daily_trades: u32,
    pub trading_day: NaiveDate,
    pub volatility: VolatilityTier,
}

/// A proposal with a position size attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizedOrder {
    pub proposal: TradeProposal,
    pub pair: String,
    pub size: f64,
    pub risk_multiplier: f64,
    pub risk_amount: f64,
    pub instrument: Instrument,
}

pub struct RiskManager {
    pub state: RiskState,
    base_risk: f64,
    max_daily_trades: u32,
    min_size: f64,
    size_step: f64,
    volatility_lookback: usize,
}

impl RiskManager {
    pub fn new(cfg: &Config, now: DateTime<Utc>) -> Self {
        Self {
            state: RiskState {
                capital: cfg.initial_capital,
                daily_trades: 0,
                trading_day: now.date_naive(),
                volatility: VolatilityTier::Normal,
            },
            base_risk: cfg.base_risk,
            max_daily_trades: cfg.max_daily_trades,
            min_size: cfg.min_position_size,
            size_step: cfg.size_step,
            volatility_lookback: cfg.volatility_lookback,
        }
    }

    pub fn risk_multiplier(&self, quality: QualityTier) -> f64 {
        quality.risk_multiplier() * self.state.volatility.risk_multiplier()
    }

    pub fn risk_amount(&self, quality: QualityTier) -> f64 {
        self.state.capital * self.base_risk * self.risk_multiplier(quality)
    }

    /// Units such that hitting the stop loses the quality- and
    /// volatility-adjusted risk amount. Never below the minimum size.
    pub fn size_position(
        &self,
        quality: QualityTier,
        entry: f64,
        stop: f64,
        instrument: &Instrument,
    ) -> Result<f64> {
        let distance = (entry - stop).abs();
        if !distance.is_finite() || distance == 0.0 {
            return Err(EngineError::InvalidProposal(format!(
                "entry {} and stop {} leave no risk distance",
                entry, stop
            )));
        }

        let increments = instrument.increments(distance);
        let raw = self.risk_amount(quality) / (increments * instrument.value_per_increment);
        let stepped = round8((raw / self.size_step).round() * self.size_step);
        Ok(stepped.max(self.min_size))
    }

    pub fn size_order(&self, pair: &str, proposal: TradeProposal, instrument: Instrument) -> Result<SizedOrder> {
        let size = self.size_position(proposal.quality, proposal.entry, proposal.stop, &instrument)?;
        Ok(SizedOrder {
            pair: pair.to_string(),
            size,
            risk_multiplier: round4(self.risk_multiplier(proposal.quality)),
            risk_amount: round2(self.risk_amount(proposal.quality)),
            instrument,
            proposal,
        })
    }

    /// Reclassify from the latest ATR against its trailing mean. An empty
    /// series leaves the tier unchanged.
    pub fn update_volatility(&mut self, atr_series: &[f64]) -> VolatilityTier {
        if let Some(tier) = classify_volatility(atr_series, self.volatility_lookback) {
            if tier != self.state.volatility {
                info!("Volatility regime: {} -> {}", self.state.volatility, tier);
            }
            self.state.volatility = tier;
        }
        self.state.volatility
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.state.trading_day {
            debug!(
                "New trading day {}: resetting {} trades",
                today, self.state.daily_trades
            );
            self.state.trading_day = today;
            self.state.daily_trades = 0;
        }
    }

    /// Daily cap first, then the high-volatility quality filter.
    pub fn can_trade(&mut self, quality: QualityTier, now: DateTime<Utc>) -> GateDecision {
        self.roll_day(now);

        if self.state.daily_trades >= self.max_daily_trades {
            return GateDecision::deny("Daily limit reached");
        }
        if self.state.volatility == VolatilityTier::High && quality == QualityTier::Low {
            return GateDecision::deny("High volatility requires high quality signals");
        }
        GateDecision::allow()
    }

    pub fn register_trade_opened(&mut self, now: DateTime<Utc>) {
        self.roll_day(now);
        self.state.daily_trades += 1;
    }

    pub fn apply_realized_pnl(&mut self, pnl: f64) {
        self.state.capital = round2(self.state.capital + pnl);
    }
}

/// Latest ATR over the mean of the last `lookback` values.
pub fn classify_volatility(atr_series: &[f64], lookback: usize) -> Option<VolatilityTier> {
    let current = *atr_series.last()?;
    let window = &atr_series[atr_series.len().saturating_sub(lookback.max(1))..];
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    let ratio = if mean > 0.0 { current / mean } else { 1.0 };

    Some(if ratio > HIGH_VOLATILITY_RATIO {
        VolatilityTier::High
    } else if ratio < LOW_VOLATILITY_RATIO {
        VolatilityTier::Low
    } else {
        VolatilityTier::Normal
    })
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round4(x: f64) -> f64 {
    (x * 10000.0).round() / 10000.0
}

fn round8(x: f64) -> f64 {
    (x * 100_000_000.0).round() / 100_000_000.0
}
