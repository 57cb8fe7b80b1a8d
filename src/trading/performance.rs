use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::core::risk::SizedOrder;
use crate::error::{EngineError, Result};
use crate::models::{QualityTier, TradeResult, TradeStatus};
use crate::trading::trade_record::{Fill, TradeRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Period {
    All,
    Week,
    Month,
}

impl Period {
    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Period::All => None,
            Period::Week => Some(now - Duration::days(7)),
            Period::Month => Some(now - Duration::days(30)),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::All => write!(f, "ALL"),
            Period::Week => write!(f, "WEEK"),
            Period::Month => write!(f, "MONTH"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    pub quality: QualityTier,
    pub count: usize,
    pub win_rate: f64,
    pub avg_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub period: Period,
    pub total_trades: usize,
    /// Fraction of trades won, 0..=1.
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub avg_rr_ratio: f64,
    /// HIGH, MEDIUM, LOW order; tiers without trades are left out.
    pub quality_analysis: Vec<QualityStats>,
    pub best_pair: String,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub avg_hold_minutes: f64,
}

impl Metrics {
    /// Tier with the highest win rate; the higher tier wins a tie.
    pub fn best_quality(&self) -> Option<QualityTier> {
        self.quality_analysis
            .iter()
            .fold(None::<&QualityStats>, |best, q| match best {
                Some(b) if b.win_rate >= q.win_rate => Some(b),
                _ => Some(q),
            })
            .map(|q| q.quality)
    }

    /// Total P&L per unit of drawdown, with drawdown floored at 1.
    pub fn risk_adjusted_return(&self) -> f64 {
        self.total_pnl / self.max_drawdown.max(1.0)
    }
}

/// Trade ledger plus the statistics derived from it.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PerformanceAnalyzer {
    trades: Vec<TradeRecord>,
    next_id: u64,
}

impl PerformanceAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a PENDING record for `order` and return its id.
    pub fn record_opened(&mut self, order: &SizedOrder, at: DateTime<Utc>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.trades.push(TradeRecord::pending(id, order, at));
        id
    }

    pub fn mark_open(&mut self, trade_id: u64, fill: &Fill) -> Result<&TradeRecord> {
        let rec = self.get_mut(trade_id)?;
        rec.confirm_open(fill)?;
        Ok(rec)
    }

    pub fn mark_error(&mut self, trade_id: u64, reason: &str) -> Result<&TradeRecord> {
        let rec = self.get_mut(trade_id)?;
        rec.mark_error(reason)?;
        Ok(rec)
    }

    /// Close an open trade. A trade already in a terminal state is rejected
    /// and left untouched.
    pub fn record_closed(
        &mut self,
        trade_id: u64,
        status: TradeStatus,
        exit_price: f64,
        exit_time: DateTime<Utc>,
    ) -> Result<&TradeRecord> {
        let rec = self.get_mut(trade_id)?;
        rec.close(status, exit_price, exit_time)?;
        Ok(rec)
    }

    pub fn get(&self, trade_id: u64) -> Option<&TradeRecord> {
        self.trades.iter().find(|t| t.id == trade_id)
    }

    fn get_mut(&mut self, trade_id: u64) -> Result<&mut TradeRecord> {
        self.trades
            .iter_mut()
            .find(|t| t.id == trade_id)
            .ok_or(EngineError::UnknownTrade(trade_id))
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn open_trades(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trades.iter().filter(|t| t.status == TradeStatus::Open)
    }

    /// Statistics over resolved trades opened within `period`. `None` when
    /// there is nothing to analyze.
    pub fn compute_metrics(&self, period: Period, now: DateTime<Utc>) -> Option<Metrics> {
        let cutoff = period.cutoff(now);
        let mut resolved: Vec<&TradeRecord> = self
            .trades
            .iter()
            .filter(|t| t.is_resolved())
            .filter(|t| cutoff.map_or(true, |c| t.opened_at >= c))
            .collect();
        if resolved.is_empty() {
            return None;
        }
        resolved.sort_by_key(|t| t.opened_at);

        let (wins, losses): (Vec<&TradeRecord>, Vec<&TradeRecord>) = resolved
            .iter()
            .copied()
            .partition(|t| t.result == Some(TradeResult::Win));

        let total = resolved.len();
        let total_pnl: f64 = resolved.iter().map(|t| pnl(t)).sum();
        let gross_profit: f64 = wins.iter().map(|t| pnl(t)).sum();
        let gross_loss: f64 = losses.iter().map(|t| pnl(t)).sum::<f64>().abs();

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let quality_analysis = QualityTier::ALL
            .iter()
            .filter_map(|&quality| {
                let bucket: Vec<&&TradeRecord> =
                    resolved.iter().filter(|t| t.quality == quality).collect();
                if bucket.is_empty() {
                    return None;
                }
                let won = bucket
                    .iter()
                    .filter(|t| t.result == Some(TradeResult::Win))
                    .count();
                Some(QualityStats {
                    quality,
                    count: bucket.len(),
                    win_rate: won as f64 / bucket.len() as f64,
                    avg_pnl: round2(bucket.iter().map(|t| pnl(t)).sum::<f64>() / bucket.len() as f64),
                })
            })
            .collect();

        let mut by_pair: BTreeMap<&str, f64> = BTreeMap::new();
        for t in &resolved {
            *by_pair.entry(t.pair.as_str()).or_default() += pnl(t);
        }
        let best_pair = by_pair
            .iter()
            .fold(None::<(&str, f64)>, |best, (pair, p)| match best {
                Some((_, bp)) if bp >= *p => best,
                _ => Some((*pair, *p)),
            })
            .map(|(pair, _)| pair.to_string())
            .unwrap_or_else(|| "N/A".to_string());

        let pnls: Vec<f64> = resolved.iter().map(|t| pnl(t)).collect();

        Some(Metrics {
            period,
            total_trades: total,
            win_rate: wins.len() as f64 / total as f64,
            total_pnl: round2(total_pnl),
            avg_pnl: mean(&pnls),
            avg_win: mean(&wins.iter().map(|t| pnl(t)).collect::<Vec<_>>()),
            avg_loss: mean(&losses.iter().map(|t| pnl(t)).collect::<Vec<_>>()),
            profit_factor,
            max_drawdown: round2(max_drawdown(&pnls)),
            avg_rr_ratio: mean(
                &resolved
                    .iter()
                    .filter_map(|t| t.rr_ratio)
                    .collect::<Vec<_>>(),
            ),
            quality_analysis,
            best_pair,
            best_trade: pnls.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            worst_trade: pnls.iter().copied().fold(f64::INFINITY, f64::min),
            avg_hold_minutes: mean(
                &resolved
                    .iter()
                    .filter_map(|t| t.exit_time.map(|x| (x - t.opened_at).num_seconds() as f64 / 60.0))
                    .collect::<Vec<_>>(),
            ),
        })
    }

    pub fn render_report(&self, period: Period, now: DateTime<Utc>) -> String {
        match self.compute_metrics(period, now) {
            Some(m) => format_report(&m),
            None => "No trades to analyze".to_string(),
        }
    }

    pub fn export_json(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.trades)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

pub fn format_report(m: &Metrics) -> String {
    let rule = "=".repeat(60);
    let mut lines = vec![
        rule.clone(),
        "CONFLUENCE SCALPER - PERFORMANCE REPORT".to_string(),
        rule.clone(),
        format!("Period: {}", m.period),
        format!("Total Trades: {}", m.total_trades),
        format!("Win Rate: {:.2}%", m.win_rate * 100.0),
        format!("Total P&L: ${:.2}", m.total_pnl),
        format!("Average P&L: ${:.2}", m.avg_pnl),
        format!("Average Win / Loss: ${:.2} / ${:.2}", m.avg_win, m.avg_loss),
        format!("Profit Factor: {:.2}", m.profit_factor),
        format!("Max Drawdown: ${:.2}", m.max_drawdown),
        format!("Average R:R: {:.2}", m.avg_rr_ratio),
        String::new(),
        "QUALITY ANALYSIS:".to_string(),
    ];
    for q in &m.quality_analysis {
        lines.push(format!(
            "  {}: {} trades, {:.2}% win rate, Avg P&L: ${:.2}",
            q.quality,
            q.count,
            q.win_rate * 100.0,
            q.avg_pnl
        ));
    }
    lines.push(String::new());
    lines.push(format!("Best Performing Pair: {}", m.best_pair));
    lines.push(rule);
    lines.join("\n")
}

/// Largest peak-to-trough fall of cumulative P&L, in order.
pub fn max_drawdown(pnls: &[f64]) -> f64 {
    let mut cumulative = 0.0;
    let mut peak = f64::NEG_INFINITY;
    let mut worst: f64 = 0.0;
    for p in pnls {
        cumulative += p;
        peak = peak.max(cumulative);
        worst = worst.max(peak - cumulative);
    }
    worst
}

fn pnl(t: &TradeRecord) -> f64 {
    t.pnl.unwrap_or(0.0)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        round2(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
