use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// +1 for long, -1 for short. Multiplies a raw price move into a P&L move.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
            Trend::Neutral => write!(f, "neutral"),
        }
    }
}

impl Trend {
    pub fn to_direction(self) -> Option<Direction> {
        match self {
            Trend::Bullish => Some(Direction::Long),
            Trend::Bearish => Some(Direction::Short),
            Trend::Neutral => None,
        }
    }
}

/// Coarse confidence grade derived from the confluence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    pub const ALL: [QualityTier; 3] = [QualityTier::High, QualityTier::Medium, QualityTier::Low];

    pub fn from_score(score: u32) -> Self {
        if score >= 8 {
            QualityTier::High
        } else if score >= 6 {
            QualityTier::Medium
        } else {
            QualityTier::Low
        }
    }

    pub fn risk_multiplier(&self) -> f64 {
        match self {
            QualityTier::High => 1.5,
            QualityTier::Medium => 1.0,
            QualityTier::Low => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::High => "HIGH",
            QualityTier::Medium => "MEDIUM",
            QualityTier::Low => "LOW",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolatilityTier {
    High,
    Normal,
    Low,
}

impl VolatilityTier {
    pub const ALL: [VolatilityTier; 3] = [VolatilityTier::High, VolatilityTier::Normal, VolatilityTier::Low];

    pub fn risk_multiplier(&self) -> f64 {
        match self {
            VolatilityTier::High => 0.7,
            VolatilityTier::Normal => 1.0,
            VolatilityTier::Low => 1.2,
        }
    }
}

impl fmt::Display for VolatilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityTier::High => write!(f, "HIGH"),
            VolatilityTier::Normal => write!(f, "NORMAL"),
            VolatilityTier::Low => write!(f, "LOW"),
        }
    }
}

/// Lifecycle state of a trade. Only ever advances Pending -> Open -> terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Pending,
    Open,
    Closed,
    Stopped,
    Taken,
    Error,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Closed | TradeStatus::Stopped | TradeStatus::Taken | TradeStatus::Error
        )
    }

    fn rank(&self) -> u8 {
        match self {
            TradeStatus::Pending => 0,
            TradeStatus::Open => 1,
            TradeStatus::Closed
            | TradeStatus::Stopped
            | TradeStatus::Taken
            | TradeStatus::Error => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the lifecycle order.
    pub fn can_advance_to(&self, next: TradeStatus) -> bool {
        match (self, next) {
            (TradeStatus::Pending, TradeStatus::Error) => true,
            (TradeStatus::Pending, TradeStatus::Open) => true,
            (TradeStatus::Open, TradeStatus::Error) => false,
            (current, next) => !current.is_terminal() && next.rank() == current.rank() + 1,
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Pending => write!(f, "PENDING"),
            TradeStatus::Open => write!(f, "OPEN"),
            TradeStatus::Closed => write!(f, "CLOSED"),
            TradeStatus::Stopped => write!(f, "STOPPED"),
            TradeStatus::Taken => write!(f, "TAKEN"),
            TradeStatus::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeResult {
    Win,
    Loss,
}

impl TradeResult {
    /// Zero P&L counts as a loss.
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl > 0.0 {
            TradeResult::Win
        } else {
            TradeResult::Loss
        }
    }
}

impl fmt::Display for TradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeResult::Win => write!(f, "WIN"),
            TradeResult::Loss => write!(f, "LOSS"),
        }
    }
}
