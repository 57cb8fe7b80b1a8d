use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::risk::{Instrument, SizedOrder};
use crate::error::{EngineError, Result};
use crate::models::{Direction, QualityTier, TradeResult, TradeStatus};

/// Execution confirmation for a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub fill_price: f64,
    pub fill_time: DateTime<Utc>,
    pub commission: f64,
}

/// One trade's full history. Entry fields are set when it opens; exit fields
/// once it reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: u64,
    pub pair: String,
    pub direction: Direction,
    pub requested_entry: f64,
    /// Fill price once open, the requested price before that.
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub size: f64,
    pub quality: QualityTier,
    pub score: u32,
    pub conditions: Vec<String>,
    pub instrument: Instrument,
    pub opened_at: DateTime<Utc>,
    pub status: TradeStatus,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pnl: Option<f64>,
    #[serde(default)]
    pub pnl_increments: Option<f64>,
    #[serde(default)]
    pub result: Option<TradeResult>,
    #[serde(default)]
    pub rr_ratio: Option<f64>,
}

impl TradeRecord {
    pub fn pending(id: u64, order: &SizedOrder, at: DateTime<Utc>) -> Self {
        let p = &order.proposal;
        Self {
            id,
            pair: order.pair.clone(),
            direction: p.direction,
            requested_entry: p.entry,
            entry: p.entry,
            stop: p.stop,
            target: p.target,
            size: order.size,
            quality: p.quality,
            score: p.score,
            conditions: p.conditions.clone(),
            instrument: order.instrument,
            opened_at: at,
            status: TradeStatus::Pending,
            order_id: None,
            commission: 0.0,
            error: None,
            exit_price: None,
            exit_time: None,
            pnl: None,
            pnl_increments: None,
            result: None,
            rr_ratio: None,
        }
    }

    /// Resolved trades carry a realized result.
    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }

    fn advance(&mut self, next: TradeStatus, action: &'static str) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(EngineError::InvalidTransition {
                trade_id: self.id,
                status: self.status,
                action,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn confirm_open(&mut self, fill: &Fill) -> Result<()> {
        self.advance(TradeStatus::Open, "open")?;
        self.order_id = Some(fill.order_id.clone());
        self.entry = fill.fill_price;
        self.opened_at = fill.fill_time;
        self.commission = fill.commission;
        Ok(())
    }

    pub fn mark_error(&mut self, reason: &str) -> Result<()> {
        self.advance(TradeStatus::Error, "mark as failed")?;
        self.error = Some(reason.to_string());
        Ok(())
    }

    /// Realize P&L at `exit_price`. Reward:risk uses the requested entry's
    /// target and stop distances, not the fill or the actual exit.
    pub fn close(&mut self, status: TradeStatus, exit_price: f64, exit_time: DateTime<Utc>) -> Result<()> {
        if !status.is_terminal() || status == TradeStatus::Error {
            return Err(EngineError::InvalidTransition {
                trade_id: self.id,
                status: self.status,
                action: "close with a non-exit status",
            });
        }
        self.advance(status, "close")?;

        let increments =
            self.instrument.increments(exit_price - self.entry) * self.direction.sign();
        let pnl = increments * self.size * self.instrument.value_per_increment;

        let risk = (self.requested_entry - self.stop).abs();
        let reward = (self.requested_entry - self.target).abs();

        self.exit_price = Some(exit_price);
        self.exit_time = Some(exit_time);
        self.pnl_increments = Some(round1(increments));
        self.pnl = Some(round2(pnl));
        self.result = Some(TradeResult::from_pnl(round2(pnl)));
        self.rr_ratio = Some(if risk > 0.0 { round2(reward / risk) } else { 0.0 });
        Ok(())
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_utc, sized_order};

    fn open_long() -> TradeRecord {
        let order = sized_order("EURUSD", Direction::Long, 1.10000, 1.09950, 1.10100, 0.15);
        let mut rec = TradeRecord::pending(1, &order, make_utc(2024, 1, 15, 9, 0));
        rec.confirm_open(&Fill {
            order_id: "SIM_1".to_string(),
            fill_price: 1.10000,
            fill_time: make_utc(2024, 1, 15, 9, 0),
            commission: 0.0002,
        })
        .unwrap();
        rec
    }

    #[test]
    fn long_win_pnl() {
        let mut rec = open_long();
        rec.close(TradeStatus::Taken, 1.10100, make_utc(2024, 1, 15, 9, 30))
            .unwrap();
        assert!((rec.pnl_increments.unwrap() - 100.0).abs() < 1e-9);
        assert!((rec.pnl.unwrap() - 150.0).abs() < 1e-9);
        assert_eq!(rec.result, Some(TradeResult::Win));
        assert!((rec.rr_ratio.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn short_loss_pnl() {
        let order = sized_order("EURUSD", Direction::Short, 1.10000, 1.10050, 1.09900, 0.20);
        let mut rec = TradeRecord::pending(2, &order, make_utc(2024, 1, 15, 9, 0));
        rec.confirm_open(&Fill {
            order_id: "SIM_2".to_string(),
            fill_price: 1.10000,
            fill_time: make_utc(2024, 1, 15, 9, 0),
            commission: 0.0,
        })
        .unwrap();
        rec.close(TradeStatus::Stopped, 1.10050, make_utc(2024, 1, 15, 9, 10))
            .unwrap();
        assert!((rec.pnl_increments.unwrap() + 50.0).abs() < 1e-9);
        assert!((rec.pnl.unwrap() + 100.0).abs() < 1e-9);
        assert_eq!(rec.result, Some(TradeResult::Loss));
    }

    #[test]
    fn flat_exit_is_a_loss() {
        let mut rec = open_long();
        rec.close(TradeStatus::Closed, 1.10000, make_utc(2024, 1, 15, 10, 0))
            .unwrap();
        assert_eq!(rec.pnl, Some(0.0));
        assert_eq!(rec.result, Some(TradeResult::Loss));
    }

    #[test]
    fn rr_uses_levels_not_exit() {
        let mut rec = open_long();
        rec.close(TradeStatus::Closed, 1.10020, make_utc(2024, 1, 15, 10, 0))
            .unwrap();
        assert!((rec.rr_ratio.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn rr_ignores_fill_slippage() {
        let order = sized_order("EURUSD", Direction::Long, 1.1000, 1.0990, 1.1020, 0.1);
        let mut rec = TradeRecord::pending(5, &order, make_utc(2024, 1, 15, 9, 0));
        rec.confirm_open(&Fill {
            order_id: "SIM_5".to_string(),
            fill_price: 1.1001,
            fill_time: make_utc(2024, 1, 15, 9, 0),
            commission: 0.0,
        })
        .unwrap();
        rec.close(TradeStatus::Taken, 1.1020, make_utc(2024, 1, 15, 9, 30))
            .unwrap();
        assert_eq!(rec.rr_ratio, Some(2.0));
        assert!((rec.pnl_increments.unwrap() - 190.0).abs() < 1e-9);
    }

    #[test]
    fn cannot_close_pending_or_twice() {
        let order = sized_order("EURUSD", Direction::Long, 1.1, 1.099, 1.102, 0.1);
        let mut pending = TradeRecord::pending(3, &order, make_utc(2024, 1, 15, 9, 0));
        assert!(pending
            .close(TradeStatus::Closed, 1.1, make_utc(2024, 1, 15, 9, 5))
            .is_err());

        let mut rec = open_long();
        rec.close(TradeStatus::Taken, 1.10100, make_utc(2024, 1, 15, 9, 30))
            .unwrap();
        let err = rec
            .close(TradeStatus::Stopped, 1.09950, make_utc(2024, 1, 15, 9, 40))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(rec.status, TradeStatus::Taken);
        assert_eq!(rec.exit_price, Some(1.10100));
    }

    #[test]
    fn error_only_from_pending() {
        let order = sized_order("EURUSD", Direction::Long, 1.1, 1.099, 1.102, 0.1);
        let mut rec = TradeRecord::pending(4, &order, make_utc(2024, 1, 15, 9, 0));
        rec.mark_error("No broker API configured").unwrap();
        assert_eq!(rec.status, TradeStatus::Error);
        assert!(!rec.is_resolved());

        let mut open = open_long();
        assert!(open.mark_error("late").is_err());
        assert!(open
            .close(TradeStatus::Error, 1.1, make_utc(2024, 1, 15, 9, 5))
            .is_err());
    }
}
