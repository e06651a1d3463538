use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::error::EngineError;
use crate::execution::entry::{decide_entry, EntryAction, EntryCandidate, EntrySource};
use crate::execution::signals::{technical_signal, SignalConfig};
use crate::execution::{
    CandleBuffer, CloseReason, NewPosition, PerformanceStats, Position, PositionBook, PriceCache,
};
use crate::gateway::{retry_once, ExchangeGateway, GatewayError, OrderRequest};
use crate::indicators::calculate_atr_pct;
use crate::models::{PricePoint, Side, Signal, Timeframe};
use crate::notify::{EngineEvent, Notifier};
use crate::persistence::{Journal, TradeRecord};
use crate::risk::{PortfolioRisk, RiskLimitTrip, RiskLimits, RiskState};
use crate::scanner::ScanReport;
use crate::stoploss::{AdaptiveStopEngine, StopConfig};
use crate::Result;

const COMMAND_BUFFER: usize = 32;
const FALLBACK_BARS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeManagerConfig {
    pub tick_secs: u64,
    pub default_leverage: u32,
    pub max_leverage: u32,
    pub fee_rate: f64,
    /// Reward:risk used for the target when the opportunity has none
    pub take_profit_rr: f64,
    pub account_refresh_ticks: u64,
    pub maintenance_ticks: u64,
    pub closed_retention: usize,
    pub candle_refresh_secs: i64,
    pub price_cache_ttl_secs: i64,
    pub price_cache_evict_secs: i64,
    /// Fall back to the technical signal when no opportunity is actionable
    pub fallback_signal: bool,
    pub fallback_instruments: usize,
    pub fallback_timeframe: Timeframe,
    pub signal: SignalConfig,
}

impl Default for TradeManagerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 10,
            default_leverage: 10,
            max_leverage: 20,
            fee_rate: 0.0004,
            take_profit_rr: 2.0,
            account_refresh_ticks: 10,
            maintenance_ticks: 30,
            closed_retention: 100,
            candle_refresh_secs: 60,
            price_cache_ttl_secs: 5,
            price_cache_evict_secs: 300,
            fallback_signal: true,
            fallback_instruments: 3,
            fallback_timeframe: Timeframe::H1,
            signal: SignalConfig::default(),
        }
    }
}

/// What one control-loop tick did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    pub managed: usize,
    pub stops_moved: usize,
    pub closed: Vec<(Uuid, CloseReason)>,
    pub opened: Vec<Uuid>,
    pub entries_halted: Option<RiskLimitTrip>,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmergencyReport {
    pub closed: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
    pub realized_pnl: f64,
}

/// Point-in-time copy of the engine state
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub running: bool,
    pub entries_paused: bool,
    pub ticks: u64,
    pub risk: RiskState,
    pub open_positions: Vec<Position>,
    pub closed_positions: usize,
    pub taken_at: DateTime<Utc>,
}

/// Auto-trading engine
///
/// Owns the position book, the risk state and the stop engine. Only the
/// control loop mutates them; everything else talks to it through a
/// [`TradeManagerHandle`].
pub struct TradeManager {
    config: TradeManagerConfig,
    limits: RiskLimits,
    gateway: Arc<dyn ExchangeGateway>,
    journal: Arc<dyn Journal>,
    notifier: Arc<dyn Notifier>,
    stops: AdaptiveStopEngine,
    book: PositionBook,
    risk: RiskState,
    candles: CandleBuffer,
    prices: PriceCache,
    opportunities: Option<watch::Receiver<Option<Arc<ScanReport>>>>,
    opportunity_max_age: chrono::Duration,
    confidence_threshold: f64,
    instruments: Vec<String>,
    running: bool,
    entries_paused: bool,
    halted: Option<RiskLimitTrip>,
    ticks: u64,
}

impl TradeManager {
    pub fn new(
        config: TradeManagerConfig,
        limits: RiskLimits,
        stop_config: StopConfig,
        gateway: Arc<dyn ExchangeGateway>,
        journal: Arc<dyn Journal>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let candles = CandleBuffer::new(stop_config.lookback_bars.max(1));
        let prices = PriceCache::new(config.price_cache_ttl_secs, config.price_cache_evict_secs);
        Self {
            book: PositionBook::new(config.fee_rate),
            // Balances arrive with the first account refresh
            risk: RiskState::new(0.0, Utc::now()),
            stops: AdaptiveStopEngine::new(stop_config),
            candles,
            prices,
            config,
            limits,
            gateway,
            journal,
            notifier,
            opportunities: None,
            opportunity_max_age: chrono::Duration::seconds(1800),
            confidence_threshold: 0.7,
            instruments: Vec::new(),
            running: true,
            entries_paused: false,
            halted: None,
            ticks: 0,
        }
    }

    /// Consume scan reports; opportunities older than `max_age_secs` are discarded
    pub fn with_opportunities(
        mut self,
        reports: watch::Receiver<Option<Arc<ScanReport>>>,
        max_age_secs: u64,
        confidence_threshold: f64,
    ) -> Self {
        self.opportunities = Some(reports);
        self.opportunity_max_age = chrono::Duration::seconds(max_age_secs as i64);
        self.confidence_threshold = confidence_threshold;
        self
    }

    /// Instruments checked by the fallback signal
    pub fn with_instruments(mut self, instruments: Vec<String>) -> Self {
        self.instruments = instruments;
        self
    }

    pub fn config(&self) -> &TradeManagerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn stops(&self) -> &AdaptiveStopEngine {
        &self.stops
    }

    pub fn risk_state(&self) -> &RiskState {
        &self.risk
    }

    /// Manual adjustments to the risk state (operator tooling and tests)
    pub fn risk_state_mut(&mut self) -> &mut RiskState {
        &mut self.risk
    }

    pub fn entries_paused(&self) -> bool {
        self.entries_paused
    }

    pub fn pause_entries(&mut self) {
        tracing::info!("⏸️  [TRADING] New entries paused");
        self.entries_paused = true;
    }

    pub fn resume_entries(&mut self) {
        tracing::info!("▶️  [TRADING] New entries resumed");
        self.entries_paused = false;
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            running: self.running,
            entries_paused: self.entries_paused,
            ticks: self.ticks,
            risk: self.risk.clone(),
            open_positions: self.book.open_positions().into_iter().cloned().collect(),
            closed_positions: self.book.closed_positions().len(),
            taken_at: Utc::now(),
        }
    }

    pub fn portfolio_risk(&self) -> PortfolioRisk {
        PortfolioRisk::assess(self.book.open_positions(), &self.risk, &self.limits)
    }

    pub fn performance(&self) -> PerformanceStats {
        PerformanceStats::from_positions(self.book.closed_positions())
    }

    /// Reload open positions from the journal after a restart
    pub async fn recover(&mut self) -> Result<usize> {
        tracing::info!("Loading open positions from journal...");
        let positions = self.journal.load_open_positions().await?;

        let mut restored = 0;
        for position in positions {
            if !position.is_open() || self.book.get(position.id).is_some() {
                continue;
            }
            tracing::info!(
                "  ✓ Restored {} {} {:.6} @ {:.4} (stop {:.4})",
                position.side,
                position.instrument,
                position.quantity,
                position.entry_price,
                position.stop_price
            );
            self.stops.seed(
                position.id,
                position.side,
                position.entry_price,
                position.stop_price,
            );
            self.book.restore(position);
            restored += 1;
        }
        self.risk.open_position_count = self.book.open_count();

        if let Err(e) = self.refresh_account().await {
            tracing::warn!("[TRADING] Account refresh after recovery failed: {}", e);
        }

        if restored == 0 {
            tracing::info!("  No open positions to recover");
        }
        Ok(restored)
    }

    pub async fn tick(&mut self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// One pass of the control loop at `now`
    ///
    /// Failures are counted and logged; nothing here ends the loop.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            tick: self.ticks,
            ..Default::default()
        };
        if !self.running {
            tracing::debug!("[TRADING] Control loop disabled, tick skipped");
            return report;
        }

        self.risk.roll_day(now);

        if self.ticks % self.config.account_refresh_ticks.max(1) == 0 {
            if let Err(e) = self.refresh_account().await {
                tracing::warn!("[TRADING] ✗ Account refresh failed: {}", e);
                report.errors += 1;
            }
        }

        self.risk.open_position_count = self.book.open_count();
        let halted = self.limits.check_entries(&self.risk).err();
        self.note_entry_gate(halted);
        report.entries_halted = halted;

        for id in self.book.open_ids() {
            if let Err(e) = self.manage_position(id, now, &mut report).await {
                tracing::warn!("[TRADING] ✗ Position {} not managed this tick: {}", id, e);
                report.errors += 1;
            }
        }

        if halted.is_none() && !self.entries_paused {
            self.try_entries(now, &mut report).await;
        }

        self.ticks += 1;
        if self.ticks % self.config.maintenance_ticks.max(1) == 0 {
            self.run_maintenance(now);
        }

        if !report.opened.is_empty() || !report.closed.is_empty() || report.errors > 0 {
            tracing::info!(
                "💹 [TRADING] Tick {}: {} managed, {} opened, {} closed, {} stops moved, {} errors",
                report.tick,
                report.managed,
                report.opened.len(),
                report.closed.len(),
                report.stops_moved,
                report.errors
            );
        }
        report
    }

    /// Close every open position and disable the control loop
    pub async fn emergency_stop(&mut self) -> EmergencyReport {
        self.emergency_stop_at(Utc::now()).await
    }

    pub async fn emergency_stop_at(&mut self, now: DateTime<Utc>) -> EmergencyReport {
        tracing::error!(
            "🚨 [TRADING] EMERGENCY STOP: closing {} open positions",
            self.book.open_count()
        );
        self.running = false;

        let mut report = EmergencyReport::default();
        for id in self.book.open_ids() {
            match self.close_position_at(id, CloseReason::Emergency, now).await {
                Ok(pnl) => {
                    report.closed.push(id);
                    report.realized_pnl += pnl;
                }
                Err(e) => {
                    tracing::error!("  ✗ Failed to close {}: {}", id, e);
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        self.notifier.notify(&EngineEvent::EmergencyStop {
            closed: report.closed.len(),
            failed: report.failed.len(),
            realized_pnl: report.realized_pnl,
        });
        report
    }

    /// Close one position on operator request
    pub async fn request_close(&mut self, id: Uuid) -> Result<f64> {
        self.close_position_at(id, CloseReason::Manual, Utc::now()).await
    }

    /// Run the control loop on its own task
    ///
    /// The task hands the manager back when it ends, either on
    /// [`TradeManagerHandle::shutdown`] or when every handle is dropped.
    pub fn spawn(self) -> (TradeManagerHandle, JoinHandle<TradeManager>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(self.run(rx));
        (TradeManagerHandle { commands: tx }, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Self {
        let period = Duration::from_secs(self.config.tick_secs.max(1));
        tracing::info!("💹 [TRADING] Control loop starting (tick every {:?})", period);

        let mut ticker = interval_at(Instant::now(), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },

                _ = ticker.tick(), if self.running => {
                    self.tick().await;
                }
            }
        }

        tracing::info!("👋 [TRADING] Control loop stopped");
        self
    }

    async fn handle_command(&mut self, command: Command) {
        // A dropped reply receiver only means the caller stopped waiting
        match command {
            Command::EmergencyStop(reply) => {
                let _ = reply.send(self.emergency_stop().await);
            }
            Command::Close(id, reply) => {
                let _ = reply.send(self.request_close(id).await);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::PortfolioRisk(reply) => {
                let _ = reply.send(self.portfolio_risk());
            }
            Command::Performance(reply) => {
                let _ = reply.send(self.performance());
            }
            Command::SetEntriesPaused(paused, reply) => {
                if paused {
                    self.pause_entries();
                } else {
                    self.resume_entries();
                }
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }

    async fn refresh_account(&mut self) -> Result<()> {
        let gateway = Arc::clone(&self.gateway);
        let balance = match retry_once("get_balance", || gateway.get_balance()).await {
            Ok(balance) => balance,
            Err(e) => {
                self.notify_gateway_failure("get_balance", None, &e);
                return Err(e.into());
            }
        };

        self.risk.update_balance(balance.total, balance.available);
        if self.risk.day_start_balance <= 0.0 {
            self.risk.day_start_balance = balance.total;
        }
        tracing::debug!(
            "[TRADING] Account: total ${:.2}, available ${:.2}",
            balance.total,
            balance.available
        );
        Ok(())
    }

    fn note_entry_gate(&mut self, halted: Option<RiskLimitTrip>) {
        if halted == self.halted {
            return;
        }
        match halted {
            Some(trip) => {
                tracing::warn!("🛑 [TRADING] New entries halted: {}", trip);
                self.notifier.notify(&EngineEvent::EntriesHalted { trip });
            }
            None => tracing::info!("✅ [TRADING] Entry gates clear again"),
        }
        self.halted = halted;
    }

    async fn manage_position(
        &mut self,
        id: Uuid,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        let position = self.book.get(id).ok_or(EngineError::PositionNotFound(id))?;
        let instrument = position.instrument.clone();
        let side = position.side;
        let entry_price = position.entry_price;
        let previous_stop = position.stop_price;

        let price = self.current_price_at(&instrument, now).await?;
        let unrealized = self.book.mark(id, price)?;
        report.managed += 1;

        let history = self.recent_history(&instrument, now).await;
        let proposed = self
            .stops
            .update_stop(id, &instrument, side, entry_price, price, &history);
        let stop = self.book.tighten_stop(id, proposed)?;

        if stop != previous_stop {
            report.stops_moved += 1;
            tracing::info!(
                "[STOP] 🔒 {} {} stop {:.4} -> {:.4} (price {:.4}, P&L ${:.2})",
                side,
                instrument,
                previous_stop,
                stop,
                price,
                unrealized
            );
            self.notifier.notify(&EngineEvent::StopMoved {
                position_id: id,
                instrument: instrument.clone(),
                stop_price: stop,
            });
            if let Some(position) = self.book.get(id).cloned() {
                self.persist_position(&position).await;
            }
        }

        let position = self.book.get(id).ok_or(EngineError::PositionNotFound(id))?;
        let reason = if position.stop_crossed(price) {
            Some(CloseReason::StopLoss)
        } else if position.target_crossed(price) {
            Some(CloseReason::TakeProfit)
        } else {
            None
        };

        if let Some(reason) = reason {
            self.close_position_at(id, reason, now).await?;
            report.closed.push((id, reason));
        }
        Ok(())
    }

    async fn try_entries(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        if let Err(trip) = self.limits.check_pacing(&self.risk, now) {
            tracing::debug!("[TRADING] Entries waiting: {}", trip);
            return;
        }

        let candidates = self.entry_candidates(now).await;
        for candidate in &candidates {
            if let Err(trip) = self.limits.check(&self.risk, now) {
                tracing::debug!("[TRADING] Stopping entries this tick: {}", trip);
                break;
            }
            match self.open_position_at(candidate, now).await {
                Ok(Some(id)) => report.opened.push(id),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("[TRADING] ✗ Entry on {} failed: {}", candidate.instrument, e);
                    report.errors += 1;
                }
            }
        }
    }

    async fn entry_candidates(&self, now: DateTime<Utc>) -> Vec<EntryCandidate> {
        let candidates = self.opportunity_candidates(now);
        if candidates.is_empty() && self.config.fallback_signal {
            return self.fallback_candidates().await;
        }
        candidates
    }

    /// Actionable high-confidence opportunities from the latest scan, in rank order
    fn opportunity_candidates(&self, now: DateTime<Utc>) -> Vec<EntryCandidate> {
        let Some(report) = self.opportunities.as_ref().and_then(|rx| rx.borrow().clone()) else {
            return Vec::new();
        };

        report
            .high_confidence(self.confidence_threshold)
            .filter(|o| o.is_actionable() && !self.book.has_open(&o.instrument))
            .filter_map(|o| {
                if o.is_stale(now, self.opportunity_max_age) {
                    let stale = EngineError::StaleOpportunity {
                        instrument: o.instrument.clone(),
                        age_secs: o.age(now).num_seconds(),
                        limit_secs: self.opportunity_max_age.num_seconds(),
                    };
                    tracing::warn!("[TRADING] ⏰ Discarded: {}", stale);
                    return None;
                }
                Some(EntryCandidate {
                    instrument: o.instrument.clone(),
                    side: o.direction.side()?,
                    source: EntrySource::Opportunity {
                        signal_strength: o.signal_strength,
                    },
                    stop_hint: o.best_stop(),
                    target_hint: o.best_target(),
                    atr_pct: Some(o.structure.atr_pct),
                })
            })
            .collect()
    }

    async fn fallback_candidates(&self) -> Vec<EntryCandidate> {
        let mut candidates = Vec::new();
        let timeframe = self.config.fallback_timeframe;

        for instrument in self.instruments.iter().take(self.config.fallback_instruments) {
            if self.book.has_open(instrument) {
                continue;
            }

            let gateway = &self.gateway;
            let bars = match retry_once("get_ohlcv", || {
                gateway.get_ohlcv(instrument, timeframe, FALLBACK_BARS)
            })
            .await
            {
                Ok(bars) => bars,
                Err(e) => {
                    self.notify_gateway_failure("get_ohlcv", Some(instrument), &e);
                    continue;
                }
            };

            let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
            let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
            let side = match technical_signal(&closes, &volumes, &self.config.signal) {
                Some(Signal::Buy) => Side::Long,
                Some(Signal::Sell) => Side::Short,
                _ => continue,
            };

            tracing::info!("[TRADING] 📈 Technical {} signal on {}", side, instrument);
            candidates.push(EntryCandidate {
                instrument: instrument.clone(),
                side,
                source: EntrySource::Fallback,
                stop_hint: None,
                target_hint: None,
                atr_pct: calculate_atr_pct(&bars, self.config.signal.rsi_period),
            });
        }
        candidates
    }

    async fn open_position_at(
        &mut self,
        candidate: &EntryCandidate,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let instrument = candidate.instrument.as_str();
        let price = self.current_price_at(instrument, now).await?;

        let stop_price = match candidate
            .stop_hint
            .filter(|stop| (price - stop) * candidate.side.sign() > 0.0)
        {
            Some(stop) => stop,
            None => {
                let history = self.recent_history(instrument, now).await;
                self.stops.initial_stop(candidate.side, price, &history)
            }
        };

        let decision = decide_entry(
            candidate,
            price,
            stop_price,
            &self.book,
            &self.risk,
            &self.limits,
            self.config.take_profit_rr,
            now,
        );
        let EntryAction::Execute {
            side,
            quantity,
            stop_price,
            take_profit_price,
        } = decision.action
        else {
            tracing::debug!("[TRADING] {} skipped: {}", instrument, decision.reason);
            return Ok(None);
        };
        tracing::info!("[TRADING] 🎯 {}: {}", instrument, decision.reason);

        let leverage = self.config.default_leverage.min(self.config.max_leverage).max(1);
        let gateway = Arc::clone(&self.gateway);
        if let Err(e) = retry_once("set_leverage", || gateway.set_leverage(instrument, leverage)).await {
            tracing::warn!(
                "[TRADING] ⚠️  Could not set {}x leverage on {}: {}",
                leverage,
                instrument,
                e
            );
        }

        let order = OrderRequest::market(instrument, side, quantity);
        let fill = match retry_once("place_order", || gateway.place_order(&order)).await {
            Ok(fill) => fill,
            Err(e) => {
                self.notify_gateway_failure("place_order", Some(instrument), &e);
                return Err(e.into());
            }
        };
        if !fill.has_fill() {
            return Err(EngineError::InvalidOrder(format!(
                "order {} for {} not filled ({:?})",
                fill.order_id, instrument, fill.status
            )));
        }

        let entry_price = if fill.avg_price > 0.0 { fill.avg_price } else { price };
        let id = self.book.open(NewPosition {
            instrument: instrument.to_string(),
            side,
            entry_price,
            quantity: fill.filled_qty,
            leverage,
            stop_price,
            take_profit_price,
            opened_at: now,
        });
        self.stops.seed(id, side, entry_price, stop_price);
        self.risk.record_open(now);
        self.prices.insert_at(instrument, entry_price, now);

        tracing::info!(
            "[TRADING] ✅ Opened {} {} {:.6} @ {:.4} (stop {:.4}, target {:.4}, {}x)",
            side,
            instrument,
            fill.filled_qty,
            entry_price,
            stop_price,
            take_profit_price,
            leverage
        );

        if let Some(position) = self.book.get(id).cloned() {
            self.persist_position(&position).await;
            self.persist_trade(&TradeRecord::opened(&position)).await;
            self.notifier.notify(&EngineEvent::PositionOpened {
                position_id: id,
                instrument: position.instrument,
                side,
                entry_price,
                quantity: position.quantity,
                stop_price,
                take_profit_price,
            });
        }
        Ok(Some(id))
    }

    async fn close_position_at(
        &mut self,
        id: Uuid,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let position = self.book.get(id).ok_or(EngineError::PositionNotFound(id))?;
        if !position.is_open() {
            return Err(EngineError::NotOpen(id));
        }
        let instrument = position.instrument.clone();
        let side = position.side;
        let last_mark = position.last_price;

        let exit_price = match self.current_price_at(&instrument, now).await {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!(
                    "[TRADING] No fresh price for {} ({}), closing at last mark {:.4}",
                    instrument,
                    e,
                    last_mark
                );
                last_mark
            }
        };

        let gateway = Arc::clone(&self.gateway);
        match retry_once("close_position", || gateway.close_position(&instrument, side)).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                "[TRADING] Venue had no {} {} position; closing the book entry",
                side,
                instrument
            ),
            Err(e) => {
                self.notify_gateway_failure("close_position", Some(&instrument), &e);
                return Err(e.into());
            }
        }

        let pnl = self.book.close(id, exit_price, reason, now)?;
        self.risk.record_close(pnl);
        self.stops.remove(id);

        let emoji = if pnl >= 0.0 { "💰" } else { "📉" };
        tracing::info!(
            "[TRADING] {} Closed {} {} @ {:.4} ({}): P&L ${:.2}",
            emoji,
            side,
            instrument,
            exit_price,
            reason,
            pnl
        );

        if let Some(position) = self.book.get(id).cloned() {
            self.persist_position(&position).await;
            if let Some(record) = TradeRecord::closed(&position) {
                self.persist_trade(&record).await;
            }
        }
        self.notifier.notify(&EngineEvent::PositionClosed {
            position_id: id,
            instrument,
            side,
            exit_price,
            pnl,
            reason,
        });
        Ok(pnl)
    }

    /// Cached price when fresh, else a ticker call
    async fn current_price_at(&self, instrument: &str, now: DateTime<Utc>) -> Result<f64> {
        if let Some(price) = self.prices.get_at(instrument, now) {
            return Ok(price);
        }

        let gateway = &self.gateway;
        match retry_once("get_ticker", || gateway.get_ticker(instrument)).await {
            Ok(ticker) => {
                self.prices.insert_at(instrument, ticker.last_price, now);
                Ok(ticker.last_price)
            }
            Err(e) => {
                self.notify_gateway_failure("get_ticker", Some(instrument), &e);
                Err(e.into())
            }
        }
    }

    /// Recent bars for the stop engine, refetched once the buffer is stale
    async fn recent_history(&self, instrument: &str, now: DateTime<Utc>) -> Vec<PricePoint> {
        let max_age = chrono::Duration::seconds(self.config.candle_refresh_secs);
        if !self.candles.is_fresh_at(instrument, max_age, now) {
            let timeframe = self.stops.config().timeframe;
            let limit = self.stops.config().lookback_bars;
            let gateway = &self.gateway;
            match retry_once("get_ohlcv", || gateway.get_ohlcv(instrument, timeframe, limit)).await {
                Ok(bars) => {
                    if let Err(e) = self.candles.replace_at(instrument, bars, now) {
                        tracing::warn!("[STOP] Candle buffer for {} not updated: {}", instrument, e);
                    }
                }
                Err(e) => {
                    tracing::warn!("[STOP] Using cached candles for {}: {}", instrument, e);
                }
            }
        }
        self.candles.get_candles(instrument).unwrap_or_default()
    }

    fn run_maintenance(&mut self, now: DateTime<Utc>) {
        let pruned = self.book.prune_closed(self.config.closed_retention);
        let evicted = self.prices.evict_stale_at(now);

        let keep: HashSet<String> = self
            .book
            .open_positions()
            .iter()
            .map(|p| p.instrument.clone())
            .collect();
        let dropped = self.candles.retain_instruments(&keep).unwrap_or_else(|e| {
            tracing::warn!("[TRADING] Candle buffer cleanup failed: {}", e);
            0
        });

        tracing::debug!(
            "🧹 [TRADING] Maintenance: pruned {} closed positions, evicted {} prices, dropped {} candle buffers",
            pruned,
            evicted,
            dropped
        );
    }

    async fn persist_position(&self, position: &Position) {
        if let Err(e) = self.journal.save_position(position).await {
            tracing::warn!("[TRADING] ⚠️  Failed to persist position {}: {}", position.id, e);
        }
    }

    async fn persist_trade(&self, record: &TradeRecord) {
        if let Err(e) = self.journal.save_trade_record(record).await {
            tracing::warn!(
                "[TRADING] ⚠️  Failed to record {} for {}: {}",
                record.action,
                record.position_id,
                e
            );
        }
    }

    fn notify_gateway_failure(&self, action: &str, instrument: Option<&str>, error: &GatewayError) {
        self.notifier.notify(&EngineEvent::GatewayFailure {
            action: action.to_string(),
            instrument: instrument.map(str::to_string),
            error: error.to_string(),
        });
    }
}

enum Command {
    EmergencyStop(oneshot::Sender<EmergencyReport>),
    Close(Uuid, oneshot::Sender<Result<f64>>),
    Snapshot(oneshot::Sender<EngineSnapshot>),
    PortfolioRisk(oneshot::Sender<PortfolioRisk>),
    Performance(oneshot::Sender<PerformanceStats>),
    SetEntriesPaused(bool, oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable control surface for a spawned [`TradeManager`]
///
/// Commands are served ahead of the next tick. Every call fails with
/// `EngineStopped` once the control loop has exited.
#[derive(Clone)]
pub struct TradeManagerHandle {
    commands: mpsc::Sender<Command>,
}

impl TradeManagerHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| EngineError::EngineStopped)?;
        rx.await.map_err(|_| EngineError::EngineStopped)
    }

    pub async fn emergency_stop(&self) -> Result<EmergencyReport> {
        self.request(Command::EmergencyStop).await
    }

    pub async fn request_close(&self, id: Uuid) -> Result<f64> {
        self.request(|reply| Command::Close(id, reply)).await?
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        self.request(Command::Snapshot).await
    }

    pub async fn portfolio_risk(&self) -> Result<PortfolioRisk> {
        self.request(Command::PortfolioRisk).await
    }

    pub async fn performance(&self) -> Result<PerformanceStats> {
        self.request(Command::Performance).await
    }

    pub async fn pause_entries(&self) -> Result<()> {
        self.request(|reply| Command::SetEntriesPaused(true, reply)).await
    }

    pub async fn resume_entries(&self) -> Result<()> {
        self.request(|reply| Command::SetEntriesPaused(false, reply)).await
    }

    /// Stop the control loop; open positions stay open
    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| EngineError::EngineStopped)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
