use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    H1,
    M15,
    M5,
    M3,
    M1,
}

impl Timeframe {
    /// Slowest first.
    pub const ALL: [Timeframe; 5] = [
        Timeframe::H1,
        Timeframe::M15,
        Timeframe::M5,
        Timeframe::M3,
        Timeframe::M1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::H1 => "H1",
            Timeframe::M15 => "M15",
            Timeframe::M5 => "M5",
            Timeframe::M3 => "M3",
            Timeframe::M1 => "M1",
        }
    }

    pub fn as_duration(&self) -> Duration {
        match self {
            Timeframe::H1 => Duration::from_secs(3600),
            Timeframe::M15 => Duration::from_secs(900),
            Timeframe::M5 => Duration::from_secs(300),
            Timeframe::M3 => Duration::from_secs(180),
            Timeframe::M1 => Duration::from_secs(60),
        }
    }

    /// Chart API interval string. M3 has no native interval and is resampled from M1.
    pub fn yahoo_interval(&self) -> &'static str {
        match self {
            Timeframe::H1 => "60m",
            Timeframe::M15 => "15m",
            Timeframe::M5 => "5m",
            Timeframe::M3 => "1m",
            Timeframe::M1 => "1m",
        }
    }

    /// Chart API lookback range large enough for the indicator warm-up.
    pub fn yahoo_range(&self) -> &'static str {
        match self {
            Timeframe::H1 => "1mo",
            Timeframe::M15 | Timeframe::M5 => "5d",
            Timeframe::M3 | Timeframe::M1 => "1d",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Timeframe> {
        match s.trim().to_uppercase().as_str() {
            "H1" | "1H" => Some(Timeframe::H1),
            "M15" | "15M" => Some(Timeframe::M15),
            "M5" | "5M" => Some(Timeframe::M5),
            "M3" | "3M" => Some(Timeframe::M3),
            "M1" | "1M" => Some(Timeframe::M1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
