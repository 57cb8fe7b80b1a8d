use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::exchange::MarketFeed;
use crate::models::{Candle, CandleSeries, Timeframe};

const BASE_URL: &str = "https://query1.finance.yahoo.com";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(250);
const CACHE_TTL: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Currency-pair candles from the Yahoo chart API.
pub struct YahooFeed {
    client: Client,
    base_url: String,
    last_request: Option<Instant>,
    cache: HashMap<String, (Instant, CandleSeries)>,
    cache_ttl: Duration,
}

impl YahooFeed {
    pub fn new(cfg: &Config) -> Result<Self> {
        Self::with_base_url(cfg, BASE_URL)
    }

    pub fn with_base_url(cfg: &Config, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.external_timeout_secs))
            .user_agent("Mozilla/5.0")
            .build()
            .map_err(|e| EngineError::Configuration(format!("market data client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            last_request: None,
            cache: HashMap::new(),
            cache_ttl: CACHE_TTL,
        })
    }

    async fn rate_limit(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    async fn download(&mut self, pair: &str, tf: Timeframe) -> Result<CandleSeries> {
        self.rate_limit().await;

        let url = format!("{}/v8/finance/chart/{}=X", self.base_url, pair);
        let resp = self
            .client
            .get(&url)
            .query(&[("interval", tf.yahoo_interval()), ("range", tf.yahoo_range())])
            .send()
            .await
            .map_err(|e| EngineError::DataUnavailable(format!("{} {}: {}", pair, tf, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::DataUnavailable(format!(
                "{} {}: chart API returned {}",
                pair, tf, status
            )));
        }

        let data: ChartResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::DataUnavailable(format!("{} {}: bad payload: {}", pair, tf, e)))?;

        if let Some(err) = data.chart.error.filter(|e| !e.is_null()) {
            return Err(EngineError::DataUnavailable(format!("{} {}: {}", pair, tf, err)));
        }

        let result = data
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| EngineError::DataUnavailable(format!("{} {}: empty chart", pair, tf)))?;

        Ok(parse_chart(result))
    }
}

fn parse_chart(result: ChartResult) -> CandleSeries {
    let Some(quote) = result.indicators.quote.into_iter().next() else {
        return CandleSeries::default();
    };

    let at = |v: &Vec<Option<f64>>, i: usize| v.get(i).copied().flatten();

    let mut candles: Vec<Candle> = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            Some(Candle {
                timestamp: DateTime::from_timestamp(*ts, 0)?,
                open: at(&quote.open, i)?,
                high: at(&quote.high, i)?,
                low: at(&quote.low, i)?,
                close: at(&quote.close, i)?,
                volume: at(&quote.volume, i).unwrap_or(0.0),
            })
        })
        .collect();

    candles.sort_by_key(|c| c.timestamp);
    CandleSeries::new(candles)
}

#[async_trait]
impl MarketFeed for YahooFeed {
    async fn fetch_candles(&mut self, pair: &str, tf: Timeframe, limit: usize) -> Result<CandleSeries> {
        let cache_key = format!("{}_{}", pair, tf);
        if let Some((cached_at, series)) = self.cache.get(&cache_key) {
            if cached_at.elapsed() < self.cache_ttl {
                return Ok(series.tail(limit));
            }
        }

        let mut series = self.download(pair, tf).await?;
        if tf == Timeframe::M3 {
            series = series.resample(tf.as_duration());
        }
        debug!("{} {}: {} candles", pair, tf, series.len());

        self.cache
            .insert(cache_key, (Instant::now(), series.clone()));

        Ok(series.tail(limit))
    }
}
