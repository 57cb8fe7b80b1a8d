use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::core::risk::SizedOrder;
use crate::error::{EngineError, Result};
use crate::models::TradeStatus;
use crate::trading::execution::ExecutionPort;
use crate::trading::performance::PerformanceAnalyzer;
use crate::trading::trade_record::TradeRecord;

/// Drives orders through PENDING -> OPEN -> terminal against an execution
/// port, recording every step in the ledger.
pub struct TradeLifecycleTracker {
    port: Box<dyn ExecutionPort>,
    call_timeout: Duration,
    /// trade id -> broker order id, for trades currently open.
    open: BTreeMap<u64, String>,
}

impl TradeLifecycleTracker {
    pub fn new(port: Box<dyn ExecutionPort>, call_timeout: Duration) -> Self {
        Self {
            port,
            call_timeout,
            open: BTreeMap::new(),
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn has_open_trades(&self, pair: &str, ledger: &PerformanceAnalyzer) -> bool {
        self.open
            .keys()
            .filter_map(|id| ledger.get(*id))
            .any(|t| t.pair == pair)
    }

    pub fn observe_price(&mut self, pair: &str, price: f64, at: DateTime<Utc>) {
        self.port.observe_price(pair, price, at);
    }

    /// Submit `order`. The ledger always gains a record: OPEN on a fill,
    /// ERROR when the port rejects it.
    pub async fn open(
        &mut self,
        order: &SizedOrder,
        ledger: &mut PerformanceAnalyzer,
        now: DateTime<Utc>,
    ) -> Result<TradeRecord> {
        let id = ledger.record_opened(order, now);

        let submitted = match timeout(self.call_timeout, self.port.submit(order)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::ExecutionRejected(format!(
                "submit timed out after {:?}",
                self.call_timeout
            ))),
        };

        match submitted {
            Ok(fill) => {
                let rec = ledger.mark_open(id, &fill)?.clone();
                self.open.insert(id, fill.order_id.clone());
                info!(
                    "OPEN #{} {} {} {:.2} @ {:.5} | SL {:.5} TP {:.5} | {} ({})",
                    id,
                    rec.pair,
                    rec.direction,
                    rec.size,
                    rec.entry,
                    rec.stop,
                    rec.target,
                    rec.quality,
                    rec.score
                );
                Ok(rec)
            }
            Err(e) => {
                let reason = match &e {
                    EngineError::ExecutionRejected(msg) => msg.clone(),
                    other => other.to_string(),
                };
                ledger.mark_error(id, &reason)?;
                warn!("Order #{} for {} failed: {}", id, order.pair, reason);
                Err(e)
            }
        }
    }

    /// Poll every open trade and close those the port reports as finished.
    pub async fn poll_open(&mut self, ledger: &mut PerformanceAnalyzer) -> Vec<TradeRecord> {
        let mut closed = Vec::new();
        let ids: Vec<(u64, String)> = self.open.iter().map(|(id, o)| (*id, o.clone())).collect();

        for (id, order_id) in ids {
            let update = match timeout(self.call_timeout, self.port.poll(&order_id)).await {
                Ok(Ok(u)) => u,
                Ok(Err(e)) => {
                    warn!("Polling #{} ({}) failed: {}", id, order_id, e);
                    continue;
                }
                Err(_) => {
                    warn!("Polling #{} ({}) timed out", id, order_id);
                    continue;
                }
            };
            if !update.status.is_terminal() {
                continue;
            }
            if update.status == TradeStatus::Error {
                // The record is OPEN and cannot move to ERROR, so flatten it.
                // If the close fails the trade stays monitored for the next pass.
                warn!("Broker reports #{} ({}) in error; closing it", id, order_id);
                match self.close(id, "broker error", ledger).await {
                    Ok(Some(rec)) => closed.push(rec),
                    Ok(None) => warn!("#{} was not closed; retrying next pass", id),
                    Err(e) => warn!("Close of #{} failed: {}; retrying next pass", id, e),
                }
                continue;
            }

            let (Some(exit_price), Some(exit_time)) = (update.exit_price, update.exit_time) else {
                warn!("#{} reported {} without exit details", id, update.status);
                continue;
            };

            match ledger.record_closed(id, update.status, exit_price, exit_time) {
                Ok(rec) => {
                    log_close(rec);
                    closed.push(rec.clone());
                }
                Err(e) => warn!("Could not close #{}: {}", id, e),
            }
            self.open.remove(&id);
        }

        closed
    }

    /// Ask the port to close one trade and record the result.
    pub async fn close(
        &mut self,
        trade_id: u64,
        reason: &str,
        ledger: &mut PerformanceAnalyzer,
    ) -> Result<Option<TradeRecord>> {
        let order_id = self
            .open
            .get(&trade_id)
            .cloned()
            .ok_or(EngineError::UnknownTrade(trade_id))?;

        let timed_out = || EngineError::ExecutionRejected(format!("close of {} timed out", order_id));
        let closed = timeout(self.call_timeout, self.port.cancel_or_close(&order_id, reason))
            .await
            .map_err(|_| timed_out())??;
        if !closed {
            return Ok(None);
        }

        let update = timeout(self.call_timeout, self.port.poll(&order_id))
            .await
            .map_err(|_| timed_out())??;
        let (Some(exit_price), Some(exit_time)) = (update.exit_price, update.exit_time) else {
            return Err(EngineError::ExecutionRejected(format!(
                "close of {} returned no exit details",
                order_id
            )));
        };

        let rec = ledger.record_closed(trade_id, update.status, exit_price, exit_time)?;
        log_close(rec);
        let rec = rec.clone();
        self.open.remove(&trade_id);
        Ok(Some(rec))
    }

    /// Close everything still open.
    pub async fn close_all(&mut self, reason: &str, ledger: &mut PerformanceAnalyzer) -> Vec<TradeRecord> {
        let ids: Vec<u64> = self.open.keys().copied().collect();
        let mut closed = Vec::new();
        for id in ids {
            match self.close(id, reason, ledger).await {
                Ok(Some(rec)) => closed.push(rec),
                Ok(None) => {}
                Err(e) => warn!("Close of #{} failed: {}", id, e),
            }
        }
        closed
    }
}

fn log_close(rec: &TradeRecord) {
    info!(
        "{} #{} {} {} @ {:.5} | {:+.1} increments | ${:+.2} | {}",
        rec.status,
        rec.id,
        rec.pair,
        rec.direction,
        rec.exit_price.unwrap_or(0.0),
        rec.pnl_increments.unwrap_or(0.0),
        rec.pnl.unwrap_or(0.0),
        rec.result.map(|r| r.to_string()).unwrap_or_default()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, TradeResult};
    use crate::test_helpers::{default_test_config, make_utc, sized_order};
    use crate::trading::execution::{LiveExecution, OrderUpdate, SimulatedExecution};
    use crate::trading::trade_record::Fill;

    fn sim_tracker() -> TradeLifecycleTracker {
        TradeLifecycleTracker::new(
            Box::new(SimulatedExecution::new(&default_test_config())),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn open_records_fill_with_slippage() {
        let mut tracker = sim_tracker();
        let mut ledger = PerformanceAnalyzer::new();
        let order = sized_order("EURUSD", Direction::Long, 1.1000, 1.0990, 1.1020, 0.1);

        let rec = tracker
            .open(&order, &mut ledger, make_utc(2024, 1, 15, 9, 0))
            .await
            .unwrap();
        assert_eq!(rec.status, TradeStatus::Open);
        assert!((rec.entry - 1.1001).abs() < 1e-9);
        assert!((rec.requested_entry - 1.1000).abs() < 1e-9);
        assert_eq!(rec.order_id.as_deref(), Some("SIM_1"));
        assert_eq!(tracker.open_count(), 1);
        assert!(tracker.has_open_trades("EURUSD", &ledger));
        assert!(!tracker.has_open_trades("GBPUSD", &ledger));
    }

    #[tokio::test]
    async fn rejected_submit_becomes_error_record() {
        let mut tracker = TradeLifecycleTracker::new(
            Box::new(LiveExecution::new(&default_test_config()).unwrap()),
            Duration::from_secs(5),
        );
        let mut ledger = PerformanceAnalyzer::new();
        let order = sized_order("EURUSD", Direction::Long, 1.1000, 1.0990, 1.1020, 0.1);

        let err = tracker
            .open(&order, &mut ledger, make_utc(2024, 1, 15, 9, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExecutionRejected(_)));
        assert_eq!(ledger.trades().len(), 1);
        let rec = &ledger.trades()[0];
        assert_eq!(rec.status, TradeStatus::Error);
        assert_eq!(rec.error.as_deref(), Some("No broker API configured"));
        assert_eq!(tracker.open_count(), 0);
    }

    #[tokio::test]
    async fn poll_closes_on_target() {
        let mut tracker = sim_tracker();
        let mut ledger = PerformanceAnalyzer::new();
        let order = sized_order("EURUSD", Direction::Long, 1.1000, 1.0990, 1.1020, 0.1);
        tracker
            .open(&order, &mut ledger, make_utc(2024, 1, 15, 9, 0))
            .await
            .unwrap();

        tracker.observe_price("EURUSD", 1.1010, make_utc(2024, 1, 15, 9, 5));
        assert!(tracker.poll_open(&mut ledger).await.is_empty());

        tracker.observe_price("EURUSD", 1.1021, make_utc(2024, 1, 15, 9, 10));
        let closed = tracker.poll_open(&mut ledger).await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status, TradeStatus::Taken);
        assert_eq!(closed[0].result, Some(TradeResult::Win));
        // 1.1001 -> 1.1020 is 190 increments
        assert!((closed[0].pnl_increments.unwrap() - 190.0).abs() < 1e-9);
        // Reward:risk stays 2.0 despite the slipped fill.
        assert_eq!(closed[0].rr_ratio, Some(2.0));
        assert_eq!(tracker.open_count(), 0);
    }

    /// Fills every order, then reports it in error until it is closed.
    struct FaultyBroker {
        close_succeeds: bool,
        closed: bool,
    }

    #[async_trait::async_trait]
    impl ExecutionPort for FaultyBroker {
        async fn submit(&mut self, order: &SizedOrder) -> Result<Fill> {
            Ok(Fill {
                order_id: "BRK_1".to_string(),
                fill_price: order.proposal.entry,
                fill_time: make_utc(2024, 1, 15, 9, 0),
                commission: 0.0,
            })
        }

        async fn poll(&mut self, order_id: &str) -> Result<OrderUpdate> {
            let update = if self.closed {
                OrderUpdate {
                    order_id: order_id.to_string(),
                    status: TradeStatus::Closed,
                    exit_price: Some(1.1005),
                    exit_time: Some(make_utc(2024, 1, 15, 9, 30)),
                }
            } else {
                OrderUpdate {
                    order_id: order_id.to_string(),
                    status: TradeStatus::Error,
                    exit_price: None,
                    exit_time: None,
                }
            };
            Ok(update)
        }

        async fn cancel_or_close(&mut self, _order_id: &str, _reason: &str) -> Result<bool> {
            self.closed = self.close_succeeds;
            Ok(self.close_succeeds)
        }

        fn name(&self) -> &'static str {
            "FAULTY"
        }
    }

    async fn open_on_faulty_broker(close_succeeds: bool) -> (TradeLifecycleTracker, PerformanceAnalyzer) {
        let mut tracker = TradeLifecycleTracker::new(
            Box::new(FaultyBroker {
                close_succeeds,
                closed: false,
            }),
            Duration::from_secs(5),
        );
        let mut ledger = PerformanceAnalyzer::new();
        let order = sized_order("EURUSD", Direction::Long, 1.1000, 1.0990, 1.1020, 0.1);
        tracker
            .open(&order, &mut ledger, make_utc(2024, 1, 15, 9, 0))
            .await
            .unwrap();
        (tracker, ledger)
    }

    #[tokio::test]
    async fn broker_error_on_open_trade_closes_it() {
        let (mut tracker, mut ledger) = open_on_faulty_broker(true).await;

        let closed = tracker.poll_open(&mut ledger).await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status, TradeStatus::Closed);
        assert_eq!(closed[0].exit_price, Some(1.1005));
        assert_eq!(tracker.open_count(), 0);
        assert_eq!(ledger.trades()[0].status, TradeStatus::Closed);
    }

    #[tokio::test]
    async fn broker_error_keeps_trade_monitored_when_close_fails() {
        let (mut tracker, mut ledger) = open_on_faulty_broker(false).await;

        assert!(tracker.poll_open(&mut ledger).await.is_empty());
        assert_eq!(tracker.open_count(), 1);
        assert_eq!(ledger.trades()[0].status, TradeStatus::Open);

        // Still polled on the next pass.
        assert!(tracker.poll_open(&mut ledger).await.is_empty());
        assert_eq!(tracker.open_count(), 1);
    }

    #[tokio::test]
    async fn manual_close_and_unknown_id() {
        let mut tracker = sim_tracker();
        let mut ledger = PerformanceAnalyzer::new();
        let order = sized_order("EURUSD", Direction::Short, 1.1000, 1.1010, 1.0980, 0.1);
        let rec = tracker
            .open(&order, &mut ledger, make_utc(2024, 1, 15, 9, 0))
            .await
            .unwrap();
        tracker.observe_price("EURUSD", 1.0995, make_utc(2024, 1, 15, 9, 20));

        let closed = tracker.close(rec.id, "manual", &mut ledger).await.unwrap().unwrap();
        assert_eq!(closed.status, TradeStatus::Closed);
        assert_eq!(closed.exit_price, Some(1.0995));

        assert!(matches!(
            tracker.close(rec.id, "again", &mut ledger).await,
            Err(EngineError::UnknownTrade(_))
        ));
    }

    #[tokio::test]
    async fn close_all_empties_book() {
        let mut tracker = sim_tracker();
        let mut ledger = PerformanceAnalyzer::new();
        for pair in ["EURUSD", "GBPUSD"] {
            let order = sized_order(pair, Direction::Long, 1.1000, 1.0990, 1.1020, 0.1);
            tracker
                .open(&order, &mut ledger, make_utc(2024, 1, 15, 9, 0))
                .await
                .unwrap();
        }
        let closed = tracker.close_all("shutdown", &mut ledger).await;
        assert_eq!(closed.len(), 2);
        assert_eq!(tracker.open_count(), 0);
    }
}
