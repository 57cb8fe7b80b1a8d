use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::error::{EngineError, Result};
use crate::models::Timeframe;

pub const DEFAULT_NEWS_URL: &str = "https://nfs.faireconomy.media/ff_calendar_thisweek.json";

/// A high-liquidity trading window in fractional hours of the configured zone.
/// Both ends are inclusive; `start > end` wraps past midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillZone {
    pub name: String,
    pub start: f64,
    pub end: f64,
}

impl KillZone {
    pub fn new(name: &str, start: f64, end: f64) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
        }
    }

    pub fn contains(&self, hour: f64) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour <= self.end
        } else {
            hour >= self.start || hour <= self.end
        }
    }
}

/// Point weights of the confluence conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub session: u32,
    pub bias_alignment: u32,
    pub liquidity_sweep: u32,
    pub structure_change: u32,
    pub volume_spike: u32,
    pub oscillator: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            session: 2,
            bias_alignment: 2,
            liquidity_sweep: 2,
            structure_change: 2,
            volume_spike: 1,
            oscillator: 1,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> u32 {
        self.session
            + self.bias_alignment
            + self.liquidity_sweep
            + self.structure_change
            + self.volume_spike
            + self.oscillator
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Universe
    pub pairs: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub candle_lookback: usize,

    // Kill zones & news
    pub kill_zones: Vec<KillZone>,
    pub kill_zone_tz: Tz,
    pub news_url: String,
    pub news_window_before_mins: i64,
    pub news_window_after_mins: i64,
    pub news_cache_secs: u64,

    // Scoring
    pub weights: ScoreWeights,
    pub minimum_score: u32,
    pub reward_ratio: f64,
    pub stop_atr_multiple: f64,
    pub stop_buffer_atr: f64,

    // Risk
    pub initial_capital: f64,
    pub base_risk: f64,
    pub max_daily_trades: u32,
    pub price_increment: f64,
    pub value_per_increment: f64,
    pub min_position_size: f64,
    pub size_step: f64,
    pub volatility_lookback: usize,

    // Execution
    pub live_trading: bool,
    pub broker_url: Option<String>,
    pub slippage: f64,
    pub commission: f64,

    // Loop
    pub cycle_interval_secs: u64,
    pub max_backoff_secs: u64,
    pub external_timeout_secs: u64,
    pub report_every: u64,

    // Logging
    pub log_dir: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pairs: vec![
                "EURUSD".to_string(),
                "GBPUSD".to_string(),
                "USDJPY".to_string(),
            ],
            timeframes: Timeframe::ALL.to_vec(),
            candle_lookback: 300,
            kill_zones: vec![
                KillZone::new("London Open", 7.0, 10.0),
                KillZone::new("London-NY Overlap", 10.0, 12.0),
                KillZone::new("New York Open", 12.0, 16.0),
            ],
            kill_zone_tz: Tz::UTC,
            news_url: DEFAULT_NEWS_URL.to_string(),
            news_window_before_mins: 60,
            news_window_after_mins: 120,
            news_cache_secs: 900,
            weights: ScoreWeights::default(),
            minimum_score: 6,
            reward_ratio: 2.0,
            stop_atr_multiple: 1.5,
            stop_buffer_atr: 0.1,
            initial_capital: 10_000.0,
            base_risk: 0.005,
            max_daily_trades: 4,
            price_increment: 0.00001,
            value_per_increment: 10.0,
            min_position_size: 0.01,
            size_step: 0.01,
            volatility_lookback: 20,
            live_trading: false,
            broker_url: None,
            slippage: 0.0001,
            commission: 0.0002,
            cycle_interval_secs: 60,
            max_backoff_secs: 600,
            external_timeout_secs: 10,
            report_every: 10,
            log_dir: "logs".to_string(),
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Defaults overridden by the environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Malformed values are errors, never
    /// silently replaced by defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let pairs = match get("PAIRS") {
            Some(raw) => raw
                .split(',')
                .map(|p| p.trim().to_uppercase())
                .filter(|p| !p.is_empty())
                .collect(),
            None => d.pairs,
        };

        let timeframes = match get("TIMEFRAMES") {
            Some(raw) => raw
                .split(',')
                .map(|t| {
                    Timeframe::from_str_loose(t).ok_or_else(|| {
                        EngineError::Configuration(format!("TIMEFRAMES: unknown timeframe '{}'", t))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => d.timeframes,
        };

        let kill_zones = match get("KILL_ZONES") {
            Some(raw) => parse_kill_zones(&raw)?,
            None => d.kill_zones,
        };

        let kill_zone_tz = match get("KILL_ZONE_TZ") {
            Some(raw) => raw.trim().parse::<Tz>().map_err(|e| {
                EngineError::Configuration(format!("KILL_ZONE_TZ: {}", e))
            })?,
            None => d.kill_zone_tz,
        };

        let weights = ScoreWeights {
            session: parse_or(&get, "WEIGHT_SESSION", d.weights.session)?,
            bias_alignment: parse_or(&get, "WEIGHT_BIAS", d.weights.bias_alignment)?,
            liquidity_sweep: parse_or(&get, "WEIGHT_SWEEP", d.weights.liquidity_sweep)?,
            structure_change: parse_or(&get, "WEIGHT_CHOCH", d.weights.structure_change)?,
            volume_spike: parse_or(&get, "WEIGHT_VOLUME", d.weights.volume_spike)?,
            oscillator: parse_or(&get, "WEIGHT_RSI", d.weights.oscillator)?,
        };

        let cfg = Config {
            pairs,
            timeframes,
            candle_lookback: parse_or(&get, "CANDLE_LOOKBACK", d.candle_lookback)?,
            kill_zones,
            kill_zone_tz,
            news_url: get("NEWS_URL").unwrap_or(d.news_url),
            news_window_before_mins: parse_or(&get, "NEWS_BEFORE_MINS", d.news_window_before_mins)?,
            news_window_after_mins: parse_or(&get, "NEWS_AFTER_MINS", d.news_window_after_mins)?,
            news_cache_secs: parse_or(&get, "NEWS_CACHE_SECS", d.news_cache_secs)?,
            weights,
            minimum_score: parse_or(&get, "MINIMUM_SCORE", d.minimum_score)?,
            reward_ratio: parse_or(&get, "REWARD_RATIO", d.reward_ratio)?,
            stop_atr_multiple: parse_or(&get, "STOP_ATR_MULTIPLE", d.stop_atr_multiple)?,
            stop_buffer_atr: parse_or(&get, "STOP_BUFFER_ATR", d.stop_buffer_atr)?,
            initial_capital: parse_or(&get, "INITIAL_CAPITAL", d.initial_capital)?,
            base_risk: parse_or(&get, "BASE_RISK", d.base_risk)?,
            max_daily_trades: parse_or(&get, "MAX_DAILY_TRADES", d.max_daily_trades)?,
            price_increment: parse_or(&get, "PRICE_INCREMENT", d.price_increment)?,
            value_per_increment: parse_or(&get, "VALUE_PER_INCREMENT", d.value_per_increment)?,
            min_position_size: parse_or(&get, "MIN_POSITION_SIZE", d.min_position_size)?,
            size_step: parse_or(&get, "SIZE_STEP", d.size_step)?,
            volatility_lookback: parse_or(&get, "VOLATILITY_LOOKBACK", d.volatility_lookback)?,
            live_trading: parse_bool(&get, "LIVE_TRADING", d.live_trading)?,
            broker_url: get("BROKER_URL").or(d.broker_url),
            slippage: parse_or(&get, "SLIPPAGE", d.slippage)?,
            commission: parse_or(&get, "COMMISSION", d.commission)?,
            cycle_interval_secs: parse_or(&get, "CYCLE_INTERVAL_SECS", d.cycle_interval_secs)?,
            max_backoff_secs: parse_or(&get, "MAX_BACKOFF_SECS", d.max_backoff_secs)?,
            external_timeout_secs: parse_or(&get, "EXTERNAL_TIMEOUT_SECS", d.external_timeout_secs)?,
            report_every: parse_or(&get, "REPORT_EVERY", d.report_every)?,
            log_dir: get("LOG_DIR").unwrap_or(d.log_dir),
            log_level: get("LOG_LEVEL").unwrap_or(d.log_level),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(EngineError::Configuration(msg));

        if self.pairs.is_empty() {
            return fail("PAIRS must list at least one pair".to_string());
        }
        if let Some(bad) = self
            .pairs
            .iter()
            .find(|p| p.len() != 6 || !p.chars().all(|c| c.is_ascii_uppercase()))
        {
            return fail(format!("PAIRS: '{}' is not a six-letter currency pair", bad));
        }
        if self.timeframes.is_empty() {
            return fail("TIMEFRAMES must not be empty".to_string());
        }
        if self.kill_zones.is_empty() {
            return fail("KILL_ZONES must define at least one window".to_string());
        }
        for kz in &self.kill_zones {
            if !(0.0..=24.0).contains(&kz.start) || !(0.0..=24.0).contains(&kz.end) {
                return fail(format!("kill zone '{}' hours must lie within 0-24", kz.name));
            }
        }
        if self.minimum_score > self.weights.total() {
            return fail(format!(
                "MINIMUM_SCORE {} exceeds the maximum attainable score {}",
                self.minimum_score,
                self.weights.total()
            ));
        }
        if !(self.base_risk > 0.0 && self.base_risk <= 0.1) {
            return fail(format!("BASE_RISK {} must be in (0, 0.1]", self.base_risk));
        }
        if !(self.initial_capital > 0.0) {
            return fail("INITIAL_CAPITAL must be positive".to_string());
        }
        if !(self.price_increment > 0.0 && self.value_per_increment > 0.0) {
            return fail("PRICE_INCREMENT and VALUE_PER_INCREMENT must be positive".to_string());
        }
        if !(self.min_position_size > 0.0 && self.size_step > 0.0) {
            return fail("MIN_POSITION_SIZE and SIZE_STEP must be positive".to_string());
        }
        if !(self.reward_ratio > 0.0 && self.stop_atr_multiple > 0.0) {
            return fail("REWARD_RATIO and STOP_ATR_MULTIPLE must be positive".to_string());
        }
        if !(self.slippage >= 0.0 && self.commission >= 0.0) {
            return fail("SLIPPAGE and COMMISSION must not be negative".to_string());
        }
        if self.volatility_lookback == 0 {
            return fail("VOLATILITY_LOOKBACK must be at least 1".to_string());
        }
        if self.news_window_before_mins < 0 || self.news_window_after_mins < 0 {
            return fail("news window bounds must not be negative".to_string());
        }
        if self.cycle_interval_secs == 0 || self.external_timeout_secs == 0 {
            return fail("CYCLE_INTERVAL_SECS and EXTERNAL_TIMEOUT_SECS must be positive".to_string());
        }
        if self.live_trading && self.broker_url.is_none() {
            return fail("LIVE_TRADING requires BROKER_URL".to_string());
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| EngineError::Configuration(format!("{}='{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_lowercase()) {
        Some(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Some(v) if v == "false" || v == "0" || v == "no" => Ok(false),
        Some(v) => Err(EngineError::Configuration(format!("{}='{}' is not a boolean", key, v))),
        None => Ok(default),
    }
}

/// `"London Open@7-10,New York Open@12-16"`
pub fn parse_kill_zones(raw: &str) -> Result<Vec<KillZone>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let bad = || EngineError::Configuration(format!("KILL_ZONES: malformed entry '{}'", entry));
            let (name, hours) = entry.split_once('@').ok_or_else(bad)?;
            let (start, end) = hours.split_once('-').ok_or_else(bad)?;
            let start: f64 = start.trim().parse().map_err(|_| bad())?;
            let end: f64 = end.trim().parse().map_err(|_| bad())?;
            Ok(KillZone::new(name.trim(), start, end))
        })
        .collect()
}
