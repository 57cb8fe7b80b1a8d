use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::Config;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Impact {
    High,
    Medium,
    Low,
    Holiday,
    Other,
}

impl Impact {
    fn parse(raw: &str) -> Impact {
        match raw.trim().to_lowercase().as_str() {
            "high" => Impact::High,
            "medium" => Impact::Medium,
            "low" => Impact::Low,
            "holiday" => Impact::Holiday,
            _ => Impact::Other,
        }
    }
}

/// A scheduled economic release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsEvent {
    pub title: String,
    /// Three-letter currency the release moves.
    pub currency: String,
    pub impact: Impact,
    pub time: DateTime<Utc>,
}

#[async_trait]
pub trait NewsFeed: Send + Sync {
    async fn fetch_events(&mut self) -> Result<Vec<NewsEvent>>;
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    title: String,
    #[serde(alias = "currency")]
    country: String,
    date: String,
    #[serde(default)]
    impact: String,
}

/// Weekly economic calendar over HTTP, cached for a configurable TTL.
pub struct ForexFactoryFeed {
    client: Client,
    url: String,
    cache: Option<(Instant, Vec<NewsEvent>)>,
    cache_ttl: Duration,
}

impl ForexFactoryFeed {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.external_timeout_secs))
            .build()
            .map_err(|e| EngineError::Configuration(format!("news client: {}", e)))?;
        Ok(Self {
            client,
            url: cfg.news_url.clone(),
            cache: None,
            cache_ttl: Duration::from_secs(cfg.news_cache_secs),
        })
    }

    async fn download(&self) -> Result<Vec<NewsEvent>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| EngineError::DataUnavailable(format!("news feed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(EngineError::DataUnavailable(format!(
                "news feed returned {}",
                resp.status()
            )));
        }

        let raw: Vec<RawEvent> = resp
            .json()
            .await
            .map_err(|e| EngineError::DataUnavailable(format!("news feed payload: {}", e)))?;

        Ok(parse_events(raw))
    }
}

fn parse_events(raw: Vec<RawEvent>) -> Vec<NewsEvent> {
    raw.into_iter()
        .filter_map(|e| match DateTime::parse_from_rfc3339(&e.date) {
            Ok(ts) => Some(NewsEvent {
                title: e.title,
                currency: e.country.trim().to_uppercase(),
                impact: Impact::parse(&e.impact),
                time: ts.with_timezone(&Utc),
            }),
            Err(err) => {
                debug!("Skipping news event '{}' with bad date '{}': {}", e.title, e.date, err);
                None
            }
        })
        .collect()
}

#[async_trait]
impl NewsFeed for ForexFactoryFeed {
    async fn fetch_events(&mut self) -> Result<Vec<NewsEvent>> {
        if let Some((fetched_at, events)) = &self.cache {
            if fetched_at.elapsed() < self.cache_ttl {
                return Ok(events.clone());
            }
        }

        let events = self.download().await?;
        debug!("News feed: {} events", events.len());
        self.cache = Some((Instant::now(), events.clone()));
        Ok(events)
    }
}

/// Fixed event list, for replay and offline runs.
#[derive(Default)]
pub struct StaticNewsFeed {
    events: Vec<NewsEvent>,
}

impl StaticNewsFeed {
    pub fn new(events: Vec<NewsEvent>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl NewsFeed for StaticNewsFeed {
    async fn fetch_events(&mut self) -> Result<Vec<NewsEvent>> {
        Ok(self.events.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::default_test_config;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn feed_for(server: &MockServer) -> ForexFactoryFeed {
        let mut cfg = default_test_config();
        cfg.news_url = format!("{}/calendar.json", server.uri());
        ForexFactoryFeed::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn parses_calendar_payload() {
        let server = MockServer::start().await;
        let body = serde_json::json!([
            {"title": "Non-Farm Employment Change", "country": "USD",
             "date": "2024-01-15T08:30:00-05:00", "impact": "High"},
            {"title": "German ZEW", "country": "EUR",
             "date": "2024-01-16T05:00:00-05:00", "impact": "Medium"},
            {"title": "Broken", "country": "GBP", "date": "tomorrow", "impact": "High"}
        ]);
        Mock::given(method("GET"))
            .and(path("/calendar.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let events = feed_for(&server).fetch_events().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].currency, "USD");
        assert_eq!(events[0].impact, Impact::High);
        assert_eq!(events[0].time.to_rfc3339(), "2024-01-15T13:30:00+00:00");
        assert_eq!(events[1].impact, Impact::Medium);
    }

    #[tokio::test]
    async fn cached_within_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let mut feed = feed_for(&server);
        feed.fetch_events().await.unwrap();
        feed.fetch_events().await.unwrap();
    }

    #[tokio::test]
    async fn server_error_is_data_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = feed_for(&server).fetch_events().await.unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_data_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
            .mount(&server)
            .await;

        let err = feed_for(&server).fetch_events().await.unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable(_)));
    }
}
