use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{Config, KillZone, ScoreWeights};
use crate::core::kill_zones::active_zone;
use crate::error::{EngineError, Result};
use crate::models::{Direction, FeatureSnapshot, QualityTier, Timeframe, TimeframeFeatures, Trend};

const MIN_STOP_DISTANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    KillZone,
    BiasAlignment,
    LiquiditySweep,
    ChangeOfCharacter,
    VolumeSpike,
    RsiConfirmation,
}

impl Condition {
    pub const ALL: [Condition; 6] = [
        Condition::KillZone,
        Condition::BiasAlignment,
        Condition::LiquiditySweep,
        Condition::ChangeOfCharacter,
        Condition::VolumeSpike,
        Condition::RsiConfirmation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::KillZone => "Kill Zone Active",
            Condition::BiasAlignment => "Bias Alignment",
            Condition::LiquiditySweep => "Liquidity Sweep",
            Condition::ChangeOfCharacter => "CHoCH Detected",
            Condition::VolumeSpike => "Volume Spike",
            Condition::RsiConfirmation => "RSI Confirmation",
        }
    }

    pub fn weight(&self, weights: &ScoreWeights) -> u32 {
        match self {
            Condition::KillZone => weights.session,
            Condition::BiasAlignment => weights.bias_alignment,
            Condition::LiquiditySweep => weights.liquidity_sweep,
            Condition::ChangeOfCharacter => weights.structure_change,
            Condition::VolumeSpike => weights.volume_spike,
            Condition::RsiConfirmation => weights.oscillator,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionResult {
    pub condition: Condition,
    pub weight: u32,
    pub satisfied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// One entry per condition, in evaluation order.
    pub results: Vec<ConditionResult>,
    pub score: u32,
    pub quality: QualityTier,
    pub direction: Option<Direction>,
}

impl ScoreBreakdown {
    pub fn satisfied(&self) -> impl Iterator<Item = Condition> + '_ {
        self.results.iter().filter(|r| r.satisfied).map(|r| r.condition)
    }

    pub fn satisfied_names(&self) -> Vec<String> {
        self.satisfied().map(|c| c.as_str().to_string()).collect()
    }

    pub fn is_satisfied(&self, condition: Condition) -> bool {
        self.results
            .iter()
            .any(|r| r.condition == condition && r.satisfied)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub direction: Direction,
    pub score: u32,
    pub quality: QualityTier,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub generated_at: DateTime<Utc>,
    pub conditions: Vec<String>,
}

/// Weighted confluence of independent technical conditions.
pub struct ConfluenceScorer {
    weights: ScoreWeights,
    minimum_score: u32,
    kill_zones: Vec<KillZone>,
    tz: Tz,
    reward_ratio: f64,
    stop_atr_multiple: f64,
    stop_buffer_atr: f64,
}

impl ConfluenceScorer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            weights: cfg.weights,
            minimum_score: cfg.minimum_score,
            kill_zones: cfg.kill_zones.clone(),
            tz: cfg.kill_zone_tz,
            reward_ratio: cfg.reward_ratio,
            stop_atr_multiple: cfg.stop_atr_multiple,
            stop_buffer_atr: cfg.stop_buffer_atr,
        }
    }

    pub fn minimum_score(&self) -> u32 {
        self.minimum_score
    }

    /// H1 trend, falling back to M15; `None` when both are neutral or absent.
    pub fn direction(&self, snapshot: &FeatureSnapshot) -> Option<Direction> {
        [Timeframe::H1, Timeframe::M15]
            .iter()
            .filter_map(|tf| snapshot.get(*tf))
            .find_map(|f| f.trend().to_direction())
    }

    /// Evaluate every condition. A missing timeframe leaves its conditions unsatisfied.
    pub fn score(&self, snapshot: &FeatureSnapshot) -> ScoreBreakdown {
        let direction = self.direction(snapshot);
        let m5 = snapshot.get(Timeframe::M5);

        let results: Vec<ConditionResult> = Condition::ALL
            .iter()
            .map(|&condition| {
                let satisfied = match condition {
                    Condition::KillZone => {
                        active_zone(&self.kill_zones, self.tz, snapshot.as_of).is_some()
                    }
                    Condition::BiasAlignment => bias_aligned(snapshot),
                    Condition::LiquiditySweep => m5.is_some_and(liquidity_sweep),
                    Condition::ChangeOfCharacter => m5.is_some_and(change_of_character),
                    Condition::VolumeSpike => snapshot
                        .get(Timeframe::M3)
                        .is_some_and(|f| f.volume_spike),
                    Condition::RsiConfirmation => match (m5, direction) {
                        (Some(f), Some(d)) => rsi_confirms(f.rsi, d),
                        _ => false,
                    },
                };
                ConditionResult {
                    condition,
                    weight: condition.weight(&self.weights),
                    satisfied,
                }
            })
            .collect();

        let score = results.iter().filter(|r| r.satisfied).map(|r| r.weight).sum();

        ScoreBreakdown {
            results,
            score,
            quality: QualityTier::from_score(score),
            direction,
        }
    }

    /// A proposal when the score clears the minimum and a direction exists.
    /// Degenerate levels are an `InvalidProposal` error.
    pub fn propose(
        &self,
        snapshot: &FeatureSnapshot,
        breakdown: &ScoreBreakdown,
    ) -> Result<Option<TradeProposal>> {
        if breakdown.score < self.minimum_score {
            return Ok(None);
        }
        let Some(direction) = breakdown.direction else {
            return Ok(None);
        };

        let (entry, stop, target) = self.levels(snapshot, direction)?;

        Ok(Some(TradeProposal {
            direction,
            score: breakdown.score,
            quality: breakdown.quality,
            entry,
            stop,
            target,
            generated_at: snapshot.as_of,
            conditions: breakdown.satisfied_names(),
        }))
    }

    /// Entry, stop and target for `direction`, derived only from the snapshot.
    pub fn levels(&self, snapshot: &FeatureSnapshot, direction: Direction) -> Result<(f64, f64, f64)> {
        let entry = snapshot
            .latest_price()
            .ok_or_else(|| EngineError::InvalidProposal("no price in snapshot".to_string()))?;

        let m5 = snapshot.get(Timeframe::M5);
        let atr = m5
            .map(|f| f.atr)
            .filter(|a| *a > 0.0)
            .or_else(|| {
                Timeframe::ALL
                    .iter()
                    .rev()
                    .filter_map(|tf| snapshot.get(*tf))
                    .map(|f| f.atr)
                    .find(|a| *a > 0.0)
            })
            .unwrap_or(0.0);

        let swing = m5.and_then(|f| match direction {
            Direction::Long => f.last_swing_low().filter(|s| *s < entry),
            Direction::Short => f.last_swing_high().filter(|s| *s > entry),
        });

        let sign = direction.sign();
        let stop = match swing {
            Some(level) => level - sign * self.stop_buffer_atr * atr,
            None => entry - sign * self.stop_atr_multiple * atr,
        };

        let risk = (entry - stop) * sign;
        if !risk.is_finite() || risk <= MIN_STOP_DISTANCE {
            return Err(EngineError::InvalidProposal(format!(
                "{} stop {:.5} is not beyond entry {:.5}",
                direction, stop, entry
            )));
        }

        let target = entry + sign * self.reward_ratio * risk;
        Ok((entry, stop, target))
    }
}

fn bias_aligned(snapshot: &FeatureSnapshot) -> bool {
    match (snapshot.get(Timeframe::H1), snapshot.get(Timeframe::M5)) {
        (Some(h1), Some(m5)) => {
            let bias = h1.trend();
            bias != Trend::Neutral && bias == m5.trend()
        }
        _ => false,
    }
}

/// Last bar ran the latest swing and closed back inside.
fn liquidity_sweep(f: &TimeframeFeatures) -> bool {
    let swept_high = f
        .last_swing_high()
        .is_some_and(|sh| f.high > sh && f.close < sh);
    let swept_low = f
        .last_swing_low()
        .is_some_and(|sl| f.low < sl && f.close > sl);
    swept_high || swept_low
}

/// Structure was trending one way and the last close broke the opposite swing.
fn change_of_character(f: &TimeframeFeatures) -> bool {
    let (Some(highs), Some(lows)) = (last_two(&f.swing_highs), last_two(&f.swing_lows)) else {
        return false;
    };

    let was_bullish = highs.1 > highs.0 && lows.1 > lows.0;
    let was_bearish = highs.1 < highs.0 && lows.1 < lows.0;

    (was_bullish && f.close < lows.1) || (was_bearish && f.close > highs.1)
}

fn rsi_confirms(rsi: f64, direction: Direction) -> bool {
    match direction {
        Direction::Long => rsi > 50.0 && rsi < 70.0,
        Direction::Short => rsi > 30.0 && rsi < 50.0,
    }
}

fn last_two(levels: &[f64]) -> Option<(f64, f64)> {
    match levels {
        [.., a, b] => Some((*a, *b)),
        _ => None,
    }
}
