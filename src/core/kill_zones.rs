use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::config::{Config, KillZone};
use crate::exchange::news::{Impact, NewsEvent, NewsFeed};
use crate::models::GateDecision;

/// Fractional hour of day of `now` in `tz`.
pub fn hour_of_day(now: DateTime<Utc>, tz: Tz) -> f64 {
    let local = now.with_timezone(&tz);
    local.hour() as f64 + local.minute() as f64 / 60.0 + local.second() as f64 / 3600.0
}

/// First configured kill zone containing `now`, if any.
pub fn active_zone(zones: &[KillZone], tz: Tz, now: DateTime<Utc>) -> Option<&KillZone> {
    let hour = hour_of_day(now, tz);
    zones.iter().find(|kz| kz.contains(hour))
}

/// Coarse UTC session label, used for logging.
pub fn market_session(now: DateTime<Utc>) -> &'static str {
    match now.hour() {
        0..=4 => "ASIA",
        5..=7 => "ASIA_EUROPE_OVERLAP",
        8..=11 => "LONDON",
        12..=15 => "LONDON_NY_OVERLAP",
        16..=20 => "NEW_YORK",
        _ => "LATE_NY",
    }
}

/// The two currencies of a six-letter pair code.
pub fn pair_currencies(pair: &str) -> (&str, &str) {
    if pair.len() >= 6 && pair.is_char_boundary(3) {
        (&pair[..3], &pair[3..6])
    } else {
        (pair, "")
    }
}

/// Time-of-day and news gate for a single pair.
pub struct KillZoneGate {
    zones: Vec<KillZone>,
    tz: Tz,
    news: Box<dyn NewsFeed>,
    news_before: Duration,
    news_after: Duration,
}

impl KillZoneGate {
    pub fn new(cfg: &Config, news: Box<dyn NewsFeed>) -> Self {
        Self {
            zones: cfg.kill_zones.clone(),
            tz: cfg.kill_zone_tz,
            news,
            news_before: Duration::minutes(cfg.news_window_before_mins),
            news_after: Duration::minutes(cfg.news_window_after_mins),
        }
    }

    pub fn is_session_open(&self, now: DateTime<Utc>) -> bool {
        active_zone(&self.zones, self.tz, now).is_some()
    }

    pub fn active_session_name(&self, now: DateTime<Utc>) -> Option<String> {
        active_zone(&self.zones, self.tz, now).map(|kz| kz.name.clone())
    }

    pub fn market_session(&self, now: DateTime<Utc>) -> &'static str {
        market_session(now)
    }

    /// High-impact events for either of the pair's currencies inside the news
    /// window around `now`. An unreachable or malformed feed yields none.
    pub async fn has_blocking_news(&mut self, pair: &str, now: DateTime<Utc>) -> Vec<NewsEvent> {
        let events = match self.news.fetch_events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("News feed unavailable, not blocking {}: {}", pair, e);
                return Vec::new();
            }
        };

        let (base, quote) = pair_currencies(pair);
        let from = now - self.news_before;
        let to = now + self.news_after;

        events
            .into_iter()
            .filter(|e| e.impact == Impact::High)
            .filter(|e| e.currency == base || e.currency == quote)
            .filter(|e| e.time >= from && e.time <= to)
            .collect()
    }

    pub async fn can_trade(&mut self, pair: &str, now: DateTime<Utc>) -> GateDecision {
        if !self.is_session_open(now) {
            debug!("{} outside kill zones ({})", pair, market_session(now));
            return GateDecision::deny("Not in active kill zone");
        }

        let blocking = self.has_blocking_news(pair, now).await;
        if !blocking.is_empty() {
            let titles: Vec<&str> = blocking.iter().take(2).map(|e| e.title.as_str()).collect();
            return GateDecision::deny(format!("High impact news: {}", titles.join(", ")));
        }

        GateDecision::allow()
    }
}
