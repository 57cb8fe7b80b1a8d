use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::core::risk::SizedOrder;
use crate::error::{EngineError, Result};
use crate::models::{Direction, TradeStatus};
use crate::trading::trade_record::Fill;

/// Broker-side state of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub status: TradeStatus,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ExecutionPort: Send + Sync {
    async fn submit(&mut self, order: &SizedOrder) -> Result<Fill>;

    async fn poll(&mut self, order_id: &str) -> Result<OrderUpdate>;

    /// `true` when the order was open and is now closed.
    async fn cancel_or_close(&mut self, order_id: &str, reason: &str) -> Result<bool>;

    /// Latest traded price for a pair. Only the simulator needs it.
    fn observe_price(&mut self, _pair: &str, _price: f64, _at: DateTime<Utc>) {}

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct SimOrder {
    pair: String,
    direction: Direction,
    fill_price: f64,
    fill_time: DateTime<Utc>,
    stop: f64,
    target: f64,
    status: TradeStatus,
    exit_price: Option<f64>,
    exit_time: Option<DateTime<Utc>>,
}

impl SimOrder {
    fn update(&self, order_id: &str) -> OrderUpdate {
        OrderUpdate {
            order_id: order_id.to_string(),
            status: self.status,
            exit_price: self.exit_price,
            exit_time: self.exit_time,
        }
    }

    fn resolve(&mut self, status: TradeStatus, price: f64, at: DateTime<Utc>) {
        self.status = status;
        self.exit_price = Some(price);
        self.exit_time = Some(at);
    }
}

/// Always fills. Slippage goes against the trader; stops and targets fill at
/// their exact level once an observed price crosses them.
pub struct SimulatedExecution {
    slippage: f64,
    commission: f64,
    orders: HashMap<String, SimOrder>,
    last_prices: HashMap<String, (f64, DateTime<Utc>)>,
    counter: u64,
}

impl SimulatedExecution {
    pub fn new(cfg: &Config) -> Self {
        Self {
            slippage: cfg.slippage,
            commission: cfg.commission,
            orders: HashMap::new(),
            last_prices: HashMap::new(),
            counter: 0,
        }
    }
}

#[async_trait]
impl ExecutionPort for SimulatedExecution {
    async fn submit(&mut self, order: &SizedOrder) -> Result<Fill> {
        let p = &order.proposal;
        let fill_price = p.entry + p.direction.sign() * self.slippage;

        self.counter += 1;
        let order_id = format!("SIM_{}", self.counter);
        self.orders.insert(
            order_id.clone(),
            SimOrder {
                pair: order.pair.clone(),
                direction: p.direction,
                fill_price,
                fill_time: p.generated_at,
                stop: p.stop,
                target: p.target,
                status: TradeStatus::Open,
                exit_price: None,
                exit_time: None,
            },
        );
        debug!("Simulated fill {} {} @ {:.5}", order_id, order.pair, fill_price);

        Ok(Fill {
            order_id,
            fill_price,
            fill_time: p.generated_at,
            commission: self.commission,
        })
    }

    async fn poll(&mut self, order_id: &str) -> Result<OrderUpdate> {
        self.orders
            .get(order_id)
            .map(|o| o.update(order_id))
            .ok_or_else(|| EngineError::ExecutionRejected(format!("unknown order {}", order_id)))
    }

    async fn cancel_or_close(&mut self, order_id: &str, reason: &str) -> Result<bool> {
        let Some(order) = self.orders.get_mut(order_id) else {
            return Ok(false);
        };
        if order.status != TradeStatus::Open {
            return Ok(false);
        }

        let (price, at) = self
            .last_prices
            .get(&order.pair)
            .copied()
            .unwrap_or((order.fill_price, order.fill_time));
        order.resolve(TradeStatus::Closed, price, at);
        info!("Closed {} @ {:.5} ({})", order_id, price, reason);
        Ok(true)
    }

    fn observe_price(&mut self, pair: &str, price: f64, at: DateTime<Utc>) {
        self.last_prices.insert(pair.to_string(), (price, at));

        for order in self
            .orders
            .values_mut()
            .filter(|o| o.pair == pair && o.status == TradeStatus::Open)
        {
            let (hit_stop, hit_target) = match order.direction {
                Direction::Long => (price <= order.stop, price >= order.target),
                Direction::Short => (price >= order.stop, price <= order.target),
            };
            if hit_stop {
                let stop = order.stop;
                order.resolve(TradeStatus::Stopped, stop, at);
            } else if hit_target {
                let target = order.target;
                order.resolve(TradeStatus::Taken, target, at);
            }
        }
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    pair: &'a str,
    direction: Direction,
    size: f64,
    entry: f64,
    stop: f64,
    target: f64,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    order_id: Option<String>,
    status: String,
    #[serde(default)]
    fill_price: Option<f64>,
    #[serde(default)]
    fill_time: Option<DateTime<Utc>>,
    #[serde(default)]
    commission: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CloseResponse {
    closed: bool,
}

/// HTTP bridge to a broker gateway. Every failure surfaces as
/// `ExecutionRejected`.
pub struct LiveExecution {
    client: Client,
    base_url: Option<String>,
}

impl LiveExecution {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.external_timeout_secs))
            .build()
            .map_err(|e| EngineError::Configuration(format!("broker client: {}", e)))?;
        Ok(Self {
            client,
            base_url: cfg
                .broker_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    fn url(&self, path: &str) -> Result<String> {
        self.base_url
            .as_ref()
            .map(|base| format!("{}{}", base, path))
            .ok_or_else(|| EngineError::ExecutionRejected("No broker API configured".to_string()))
    }

    async fn read<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::ExecutionRejected(format!(
                "broker returned {}: {}",
                status, body
            )));
        }
        resp.json()
            .await
            .map_err(|e| EngineError::ExecutionRejected(format!("bad broker response: {}", e)))
    }
}

fn transport(e: reqwest::Error) -> EngineError {
    EngineError::ExecutionRejected(format!("broker unreachable: {}", e))
}

#[async_trait]
impl ExecutionPort for LiveExecution {
    async fn submit(&mut self, order: &SizedOrder) -> Result<Fill> {
        let url = self.url("/orders")?;
        let p = &order.proposal;
        let body = OrderRequest {
            pair: &order.pair,
            direction: p.direction,
            size: order.size,
            entry: p.entry,
            stop: p.stop,
            target: p.target,
        };

        let resp = self.client.post(url).json(&body).send().await.map_err(transport)?;
        let data: SubmitResponse = Self::read(resp).await?;

        if !data.status.eq_ignore_ascii_case("filled") {
            return Err(EngineError::ExecutionRejected(
                data.reason
                    .unwrap_or_else(|| format!("order {}", data.status.to_lowercase())),
            ));
        }

        let order_id = data
            .order_id
            .ok_or_else(|| EngineError::ExecutionRejected("fill without order id".to_string()))?;
        Ok(Fill {
            order_id,
            fill_price: data.fill_price.unwrap_or(p.entry),
            fill_time: data.fill_time.unwrap_or_else(Utc::now),
            commission: data.commission.unwrap_or(0.0),
        })
    }

    async fn poll(&mut self, order_id: &str) -> Result<OrderUpdate> {
        let url = self.url(&format!("/orders/{}", order_id))?;
        let resp = self.client.get(url).send().await.map_err(transport)?;
        Self::read(resp).await
    }

    async fn cancel_or_close(&mut self, order_id: &str, reason: &str) -> Result<bool> {
        let url = self.url(&format!("/orders/{}/close", order_id))?;
        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .await
            .map_err(transport)?;
        let data: CloseResponse = Self::read(resp).await?;
        Ok(data.closed)
    }

    fn name(&self) -> &'static str {
        "live"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{default_test_config, make_utc, sized_order};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn simulated_fill_applies_adverse_slippage() {
        let mut sim = SimulatedExecution::new(&default_test_config());
        let long = sized_order("EURUSD", Direction::Long, 1.1000, 1.0990, 1.1020, 0.1);
        let short = sized_order("EURUSD", Direction::Short, 1.1000, 1.1010, 1.0980, 0.1);

        let f1 = sim.submit(&long).await.unwrap();
        let f2 = sim.submit(&short).await.unwrap();
        assert!((f1.fill_price - 1.1001).abs() < 1e-9);
        assert!((f2.fill_price - 1.0999).abs() < 1e-9);
        assert_eq!(f1.order_id, "SIM_1");
        assert_eq!(f2.order_id, "SIM_2");
        assert!((f1.commission - 0.0002).abs() < 1e-12);
    }

    #[tokio::test]
    async fn simulated_stop_and_target() {
        let mut sim = SimulatedExecution::new(&default_test_config());
        let long = sized_order("EURUSD", Direction::Long, 1.1000, 1.0990, 1.1020, 0.1);
        let short = sized_order("GBPUSD", Direction::Short, 1.2700, 1.2710, 1.2680, 0.1);
        let a = sim.submit(&long).await.unwrap().order_id;
        let b = sim.submit(&short).await.unwrap().order_id;

        let t = make_utc(2024, 1, 15, 9, 5);
        sim.observe_price("EURUSD", 1.1005, t);
        assert_eq!(sim.poll(&a).await.unwrap().status, TradeStatus::Open);

        sim.observe_price("EURUSD", 1.1025, t);
        let up = sim.poll(&a).await.unwrap();
        assert_eq!(up.status, TradeStatus::Taken);
        assert_eq!(up.exit_price, Some(1.1020));
        assert_eq!(up.exit_time, Some(t));

        sim.observe_price("GBPUSD", 1.2712, t);
        let down = sim.poll(&b).await.unwrap();
        assert_eq!(down.status, TradeStatus::Stopped);
        assert_eq!(down.exit_price, Some(1.2710));

        // Resolved orders are not re-evaluated
        sim.observe_price("EURUSD", 1.0900, t);
        assert_eq!(sim.poll(&a).await.unwrap().status, TradeStatus::Taken);
    }

    #[tokio::test]
    async fn simulated_close_uses_last_price() {
        let mut sim = SimulatedExecution::new(&default_test_config());
        let long = sized_order("EURUSD", Direction::Long, 1.1000, 1.0990, 1.1020, 0.1);
        let id = sim.submit(&long).await.unwrap().order_id;
        sim.observe_price("EURUSD", 1.1008, make_utc(2024, 1, 15, 9, 30));

        assert!(sim.cancel_or_close(&id, "shutdown").await.unwrap());
        let up = sim.poll(&id).await.unwrap();
        assert_eq!(up.status, TradeStatus::Closed);
        assert_eq!(up.exit_price, Some(1.1008));

        assert!(!sim.cancel_or_close(&id, "again").await.unwrap());
        assert!(!sim.cancel_or_close("SIM_99", "missing").await.unwrap());
        assert!(sim.poll("SIM_99").await.is_err());
    }

    #[tokio::test]
    async fn live_without_broker_is_rejected() {
        let mut live = LiveExecution::new(&default_test_config()).unwrap();
        let order = sized_order("EURUSD", Direction::Long, 1.1000, 1.0990, 1.1020, 0.1);
        let err = live.submit(&order).await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionRejected(ref m) if m == "No broker API configured"));
        assert!(live.poll("X").await.is_err());
    }

    fn live_for(server: &MockServer) -> LiveExecution {
        let mut cfg = default_test_config();
        cfg.broker_url = Some(server.uri());
        LiveExecution::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn live_fill_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "order_id": "B-42", "status": "FILLED", "fill_price": 1.10012,
                "fill_time": "2024-01-15T09:00:03Z", "commission": 0.7
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orders/B-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "order_id": "B-42", "status": "TAKEN", "exit_price": 1.1020,
                "exit_time": "2024-01-15T09:40:00Z"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/orders/B-42/close"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"closed": false})))
            .mount(&server)
            .await;

        let mut live = live_for(&server);
        let order = sized_order("EURUSD", Direction::Long, 1.1000, 1.0990, 1.1020, 0.1);
        let fill = live.submit(&order).await.unwrap();
        assert_eq!(fill.order_id, "B-42");
        assert!((fill.fill_price - 1.10012).abs() < 1e-9);

        let up = live.poll("B-42").await.unwrap();
        assert_eq!(up.status, TradeStatus::Taken);
        assert_eq!(up.exit_price, Some(1.1020));
        assert!(!live.cancel_or_close("B-42", "manual").await.unwrap());
    }

    #[tokio::test]
    async fn live_rejection_and_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "REJECTED", "reason": "insufficient margin"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let mut live = live_for(&server);
        let order = sized_order("EURUSD", Direction::Long, 1.1000, 1.0990, 1.1020, 0.1);
        let err = live.submit(&order).await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionRejected(ref m) if m == "insufficient margin"));
        assert!(matches!(
            live.poll("B-1").await.unwrap_err(),
            EngineError::ExecutionRejected(_)
        ));
    }
}
