use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::indicators::{atr_series, ATR_PERIOD};
use crate::core::kill_zones::KillZoneGate;
use crate::core::risk::{Instrument, RiskManager};
use crate::core::scoring::ConfluenceScorer;
use crate::error::{EngineError, Result};
use crate::exchange::{snapshot, MarketFeed, NewsFeed};
use crate::models::{GateDecision, QualityTier, Timeframe};
use crate::trading::{ExecutionPort, PerformanceAnalyzer, Period, TradeLifecycleTracker, TradeRecord};

/// What happened to one pair in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Gated(String),
    NoSignal,
    RiskDenied(String),
    Opened(u64),
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub outcomes: Vec<(String, Result<PairOutcome>)>,
    pub closed: Vec<TradeRecord>,
}

impl CycleReport {
    /// Every processed pair errored. Gating and missing signals are not failures.
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|(_, o)| o.is_err())
    }

    pub fn opened(&self) -> Vec<u64> {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| match o {
                Ok(PairOutcome::Opened(id)) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

pub struct ConfluenceBot {
    cfg: Config,
    feed: Box<dyn MarketFeed>,
    gate: KillZoneGate,
    scorer: ConfluenceScorer,
    risk: RiskManager,
    tracker: TradeLifecycleTracker,
    ledger: PerformanceAnalyzer,
    call_timeout: Duration,
    cycles: u64,
    delay: Duration,
}

impl ConfluenceBot {
    pub fn new(
        cfg: Config,
        feed: Box<dyn MarketFeed>,
        news: Box<dyn NewsFeed>,
        port: Box<dyn ExecutionPort>,
        now: DateTime<Utc>,
    ) -> Self {
        info!("{}", "=".repeat(60));
        info!("Confluence Scalper starting up");
        info!(
            "Mode: {} ({})",
            if cfg.live_trading {
                "LIVE TRADING"
            } else {
                "PAPER TRADING"
            },
            port.name()
        );
        info!("Pairs: {}", cfg.pairs.join(", "));
        info!("Kill zones ({}):", cfg.kill_zone_tz);
        for kz in &cfg.kill_zones {
            info!("  {}: {:05.2}-{:05.2}", kz.name, kz.start, kz.end);
        }
        info!(
            "Minimum score: {}/{} | Max trades/day: {} | Base risk: {:.2}%",
            cfg.minimum_score,
            cfg.weights.total(),
            cfg.max_daily_trades,
            cfg.base_risk * 100.0
        );
        info!("{}", "=".repeat(60));

        let call_timeout = Duration::from_secs(cfg.external_timeout_secs);
        Self {
            gate: KillZoneGate::new(&cfg, news),
            scorer: ConfluenceScorer::new(&cfg),
            risk: RiskManager::new(&cfg, now),
            tracker: TradeLifecycleTracker::new(port, call_timeout),
            ledger: PerformanceAnalyzer::new(),
            delay: Duration::from_secs(cfg.cycle_interval_secs),
            call_timeout,
            cycles: 0,
            feed,
            cfg,
        }
    }

    pub fn ledger(&self) -> &PerformanceAnalyzer {
        &self.ledger
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn tracker(&self) -> &TradeLifecycleTracker {
        &self.tracker
    }

    /// Delay before the next cycle.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    /// Gate, score, size and submit one pair.
    pub async fn process_pair(&mut self, pair: &str, now: DateTime<Utc>) -> Result<PairOutcome> {
        let decision = match timeout(self.call_timeout, self.gate.can_trade(pair, now)).await {
            Ok(d) => d,
            Err(_) => {
                warn!("{}: news check timed out", pair);
                if self.gate.is_session_open(now) {
                    GateDecision::allow()
                } else {
                    GateDecision::deny("Not in active kill zone")
                }
            }
        };
        if !decision.allowed {
            debug!("{} gated: {}", pair, decision.reason_or_default());
            return Ok(PairOutcome::Gated(decision.reason_or_default().to_string()));
        }
        if let Some(zone) = self.gate.active_session_name(now) {
            debug!("{} in {}", pair, zone);
        }

        // Daily cap before spending a market-data round trip.
        let precheck = self.risk.can_trade(QualityTier::High, now);
        if !precheck.allowed {
            return Ok(PairOutcome::RiskDenied(precheck.reason_or_default().to_string()));
        }

        let timeframes = self.cfg.timeframes.clone();
        let limit = self.cfg.candle_lookback;
        let snap = {
            let fut = snapshot(self.feed.as_mut(), pair, &timeframes, now, limit);
            timeout(self.call_timeout, fut)
                .await
                .map_err(|_| EngineError::DataUnavailable(format!("{} market data timed out", pair)))??
        };

        let breakdown = self.scorer.score(&snap);
        debug!(
            "{} score {}/{} [{}] strong H1 trend: {}",
            pair,
            breakdown.score,
            self.scorer.minimum_score(),
            breakdown.satisfied_names().join(", "),
            snap.get(Timeframe::H1).is_some_and(|f| f.is_strong_trend())
        );

        let proposal = match self.scorer.propose(&snap, &breakdown) {
            Ok(Some(p)) => p,
            Ok(None) => return Ok(PairOutcome::NoSignal),
            Err(EngineError::InvalidProposal(msg)) => {
                debug!("{}: discarded proposal ({})", pair, msg);
                return Ok(PairOutcome::NoSignal);
            }
            Err(e) => return Err(e),
        };

        let decision = self.risk.can_trade(proposal.quality, now);
        if !decision.allowed {
            info!("Trade rejected for {}: {}", pair, decision.reason_or_default());
            return Ok(PairOutcome::RiskDenied(decision.reason_or_default().to_string()));
        }

        let instrument = Instrument::for_pair(pair, &self.cfg);
        let order = self.risk.size_order(pair, proposal, instrument)?;
        info!(
            "Signal {} {} score {} ({}) size {:.2} risking ${:.2}",
            pair,
            order.proposal.direction,
            order.proposal.score,
            order.proposal.quality,
            order.size,
            order.risk_amount
        );

        let rec = self.tracker.open(&order, &mut self.ledger, now).await?;
        self.risk.register_trade_opened(now);
        Ok(PairOutcome::Opened(rec.id))
    }

    async fn refresh_volatility(&mut self) {
        let Some(pair) = self.cfg.pairs.first().cloned() else {
            return;
        };
        let lookback = self.cfg.candle_lookback;
        let fut = self.feed.fetch_candles(&pair, Timeframe::M15, lookback);
        match timeout(self.call_timeout, fut).await {
            Ok(Ok(series)) => {
                self.risk.update_volatility(&atr_series(&series, ATR_PERIOD));
            }
            Ok(Err(e)) => debug!("Volatility refresh skipped: {}", e),
            Err(_) => debug!("Volatility refresh timed out"),
        }
    }

    /// Feed the latest price of every pair with open trades to the port, then
    /// collect trades it reports as finished.
    async fn monitor_open(&mut self, now: DateTime<Utc>) -> Vec<TradeRecord> {
        let pairs: Vec<String> = self
            .cfg
            .pairs
            .iter()
            .filter(|p| self.tracker.has_open_trades(p, &self.ledger))
            .cloned()
            .collect();

        for pair in pairs {
            match timeout(self.call_timeout, self.feed.latest_price(&pair)).await {
                Ok(Ok(price)) => self.tracker.observe_price(&pair, price, now),
                Ok(Err(e)) => debug!("{}: no price for monitoring ({})", pair, e),
                Err(_) => debug!("{}: price request timed out", pair),
            }
        }

        let closed = self.tracker.poll_open(&mut self.ledger).await;
        for rec in &closed {
            if let Some(pnl) = rec.pnl {
                self.risk.apply_realized_pnl(pnl);
            }
        }
        closed
    }

    /// One pass over every pair followed by a monitoring pass.
    pub async fn cycle(&mut self, now: DateTime<Utc>, shutdown: &watch::Receiver<bool>) -> CycleReport {
        self.cycles += 1;
        self.refresh_volatility().await;

        let mut report = CycleReport::default();
        for pair in self.cfg.pairs.clone() {
            if *shutdown.borrow() {
                info!("Shutdown requested, skipping remaining pairs");
                break;
            }
            let outcome = self.process_pair(&pair, now).await;
            if let Err(e) = &outcome {
                error!("Error processing {}: {}", pair, e);
            }
            report.outcomes.push((pair, outcome));
        }

        report.closed = self.monitor_open(now).await;

        if self.cfg.report_every > 0 && self.cycles % self.cfg.report_every == 0 {
            info!("\n{}", self.ledger.render_report(Period::All, now));
        }
        self.delay = self.next_delay(&report);
        report
    }

    /// Doubles while every pair fails, capped; back to the base interval otherwise.
    fn next_delay(&self, report: &CycleReport) -> Duration {
        let base = Duration::from_secs(self.cfg.cycle_interval_secs);
        if report.all_failed() {
            let cap = Duration::from_secs(self.cfg.max_backoff_secs);
            let next = (self.delay * 2).min(cap).max(base);
            warn!("All pairs failed, backing off {:?}", next);
            next
        } else {
            base
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutting down...");
                    let _ = tx.send(true);
                }
                Err(e) => error!("Could not listen for Ctrl+C: {}", e),
            }
        });

        info!("Bot is now running. Press Ctrl+C to stop.");
        let report = self.run_until(rx).await;
        info!("\n{}", report);
        info!("Bot stopped.");
        Ok(())
    }

    /// Cycle until `shutdown` turns true, then return the final report. The
    /// pair in progress always finishes.
    pub async fn run_until(&mut self, mut shutdown: watch::Receiver<bool>) -> String {
        while !*shutdown.borrow() {
            self.cycle(Utc::now(), &shutdown).await;
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => {}
            }
        }

        let now = Utc::now();
        let still_open = self.ledger.open_trades().count();
        if still_open > 0 {
            info!("{} trade(s) still open at shutdown", still_open);
        }
        let path = Path::new(&self.cfg.log_dir).join("trades.json");
        match self.ledger.export_json(&path) {
            Ok(()) => info!("Trade ledger written to {}", path.display()),
            Err(e) => warn!("Could not export trade ledger: {:#}", e),
        }
        self.final_report(now)
    }

    /// Performance report plus the shutdown summary lines.
    pub fn final_report(&self, now: DateTime<Utc>) -> String {
        let mut report = self.ledger.render_report(Period::All, now);
        if let Some(m) = self.ledger.compute_metrics(Period::All, now) {
            let best = m
                .best_quality()
                .map(|q| q.to_string())
                .unwrap_or_else(|| "N/A".to_string());
            report.push_str(&format!("\nBest Quality: {}", best));
            report.push_str(&format!("\nAvg Trade Duration: {:.1} min", m.avg_hold_minutes));
            report.push_str(&format!("\nBest Trade: ${:.2} | Worst Trade: ${:.2}", m.best_trade, m.worst_trade));
            report.push_str(&format!("\nRisk-Adjusted Return: {:.2}", m.risk_adjusted_return()));
        }
        report
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: no shutdown can arrive any more.
            std::future::pending::<()>().await;
        }
    }
}
