// Opportunity scanning
// Fans the analyzer out over an instrument universe with a bounded worker pool

pub mod opportunity;

pub use opportunity::{derive_opportunity, Opportunity, PriceCandidate, RiskTier};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::analysis::MarketStructureAnalyzer;
use crate::gateway::{retry_once, ExchangeGateway};
use crate::models::Timeframe;
use crate::persistence::Journal;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub instruments: Vec<String>,
    pub timeframe: Timeframe,
    pub max_workers: usize,
    pub task_timeout_ms: u64,
    /// Minimum signal strength for a high-confidence result
    pub confidence_threshold: f64,
    pub scan_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub history_limit: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            instruments: ["BTC/USDT", "ETH/USDT", "SOL/USDT", "BNB/USDT", "XRP/USDT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeframe: Timeframe::H4,
            max_workers: 5,
            task_timeout_ms: 60_000,
            confidence_threshold: 0.7,
            scan_interval_secs: 1800,
            error_backoff_secs: 60,
            history_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SlotOutcome {
    Evaluated(Box<Opportunity>),
    Failed(String),
    TimedOut,
}

/// Result slot for one scanned instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSlot {
    pub instrument: String,
    pub outcome: SlotOutcome,
    pub elapsed_ms: u64,
}

impl ScanSlot {
    pub fn opportunity(&self) -> Option<&Opportunity> {
        match &self.outcome {
            SlotOutcome::Evaluated(opportunity) => Some(opportunity),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SlotOutcome::Evaluated(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub timeframe: Timeframe,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scanned: usize,
    pub succeeded: usize,
    /// One slot per requested instrument, in request order
    pub slots: Vec<ScanSlot>,
    /// Successful evaluations, strongest first, ties by instrument name
    pub ranked: Vec<Opportunity>,
}

impl ScanReport {
    pub fn high_confidence(&self, threshold: f64) -> impl Iterator<Item = &Opportunity> {
        self.ranked
            .iter()
            .filter(move |o| o.signal_strength >= threshold)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScanSlot> {
        self.slots.iter().filter(|s| !s.is_success())
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Sort strongest first; equal strength falls back to instrument name
pub fn rank_opportunities(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(|a, b| {
        b.signal_strength
            .total_cmp(&a.signal_strength)
            .then_with(|| a.instrument.cmp(&b.instrument))
    });
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStatus {
    pub running: bool,
    pub auto_scan: bool,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<i64>,
    pub last_scanned: usize,
    pub last_succeeded: usize,
    pub high_confidence: usize,
}

/// Stops a running auto-scan loop
pub struct AutoScanHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AutoScanHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("[SCAN] auto-scan task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct OpportunityScanner {
    gateway: Arc<dyn ExchangeGateway>,
    analyzer: Arc<MarketStructureAnalyzer>,
    journal: Option<Arc<dyn Journal>>,
    config: ScannerConfig,
    latest: watch::Sender<Option<Arc<ScanReport>>>,
    high_confidence: Mutex<Vec<Opportunity>>,
    last_report: Mutex<Option<(DateTime<Utc>, i64, usize, usize)>>,
    active_scans: AtomicUsize,
    auto_scan: AtomicBool,
}

impl OpportunityScanner {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        analyzer: MarketStructureAnalyzer,
        config: ScannerConfig,
    ) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            gateway,
            analyzer: Arc::new(analyzer),
            journal: None,
            config,
            latest,
            high_confidence: Mutex::new(Vec::new()),
            last_report: Mutex::new(None),
            active_scans: AtomicUsize::new(0),
            auto_scan: AtomicBool::new(false),
        }
    }

    /// Persist high-confidence results through `journal`
    pub fn with_journal(mut self, journal: Arc<dyn Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Receiver for the most recent report
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ScanReport>>> {
        self.latest.subscribe()
    }

    pub fn latest_report(&self) -> Option<Arc<ScanReport>> {
        self.latest.borrow().clone()
    }

    /// High-confidence results retained from the last scan
    pub fn high_confidence(&self) -> Vec<Opportunity> {
        self.high_confidence
            .lock()
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    pub fn status(&self) -> ScanStatus {
        let last = self.last_report.lock().ok().and_then(|r| *r);
        ScanStatus {
            running: self.active_scans.load(Ordering::SeqCst) > 0,
            auto_scan: self.auto_scan.load(Ordering::SeqCst),
            last_scan_at: last.map(|(at, _, _, _)| at),
            last_duration_ms: last.map(|(_, ms, _, _)| ms),
            last_scanned: last.map(|(_, _, n, _)| n).unwrap_or(0),
            last_succeeded: last.map(|(_, _, _, n)| n).unwrap_or(0),
            high_confidence: self.high_confidence.lock().map(|l| l.len()).unwrap_or(0),
        }
    }

    /// Evaluate every instrument and rank the successes
    ///
    /// Never fails as a whole: each instrument gets a slot recording its
    /// opportunity, its error, or its timeout.
    pub async fn scan_universe(&self, instruments: &[String], timeframe: Timeframe) -> ScanReport {
        self.active_scans.fetch_add(1, Ordering::SeqCst);
        let started_at = Utc::now();
        let workers = self.config.max_workers.max(1);
        let task_timeout = Duration::from_millis(self.config.task_timeout_ms);

        tracing::info!(
            "🔍 [SCAN] Scanning {} instruments on {} ({} workers)",
            instruments.len(),
            timeframe,
            workers
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = Vec::with_capacity(instruments.len());

        for instrument in instruments {
            let semaphore = semaphore.clone();
            let gateway = self.gateway.clone();
            let analyzer = self.analyzer.clone();
            let instrument_clone = instrument.clone();
            let limit = self.config.history_limit;

            let task = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return (SlotOutcome::Failed(e.to_string()), 0),
                };

                let started = Instant::now();
                let evaluation = evaluate_instrument(
                    gateway.as_ref(),
                    &analyzer,
                    &instrument_clone,
                    timeframe,
                    limit,
                );
                let outcome = match tokio::time::timeout(task_timeout, evaluation).await {
                    Ok(Ok(opportunity)) => SlotOutcome::Evaluated(Box::new(opportunity)),
                    Ok(Err(e)) => {
                        tracing::warn!("⚠️  [SCAN] {} skipped: {}", instrument_clone, e);
                        SlotOutcome::Failed(e.to_string())
                    }
                    Err(_) => {
                        tracing::warn!(
                            "⏱️  [SCAN] {} timed out after {:?}",
                            instrument_clone,
                            task_timeout
                        );
                        SlotOutcome::TimedOut
                    }
                };
                (outcome, started.elapsed().as_millis() as u64)
            });

            tasks.push((instrument.clone(), task));
        }

        let mut slots = Vec::with_capacity(tasks.len());
        for (instrument, task) in tasks {
            let (outcome, elapsed_ms) = match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("❌ [SCAN] {} task failed: {}", instrument, e);
                    (SlotOutcome::Failed(format!("task failed: {}", e)), 0)
                }
            };
            slots.push(ScanSlot {
                instrument,
                outcome,
                elapsed_ms,
            });
        }

        let mut ranked: Vec<Opportunity> = slots
            .iter()
            .filter_map(|s| s.opportunity().cloned())
            .collect();
        rank_opportunities(&mut ranked);

        let report = ScanReport {
            timeframe,
            started_at,
            finished_at: Utc::now(),
            scanned: slots.len(),
            succeeded: ranked.len(),
            slots,
            ranked,
        };

        self.publish(&report).await;
        self.active_scans.fetch_sub(1, Ordering::SeqCst);
        report
    }

    async fn publish(&self, report: &ScanReport) {
        let threshold = self.config.confidence_threshold;
        let promoted: Vec<Opportunity> = report.high_confidence(threshold).cloned().collect();

        tracing::info!(
            "✅ [SCAN] {}/{} evaluated in {}ms, {} high-confidence",
            report.succeeded,
            report.scanned,
            report.duration_ms(),
            promoted.len()
        );
        for opportunity in promoted.iter().filter(|o| o.is_actionable()) {
            tracing::info!(
                "🎯 [SCAN] {} {} strength {:.2} R:R {:.2} ({:?} risk)",
                opportunity.instrument,
                opportunity.direction,
                opportunity.signal_strength,
                opportunity.reward_risk_ratio,
                opportunity.risk_tier
            );
        }

        if let Some(journal) = &self.journal {
            for opportunity in &promoted {
                if let Err(e) = journal.save_opportunity(opportunity).await {
                    tracing::warn!(
                        "⚠️  [SCAN] Failed to persist opportunity for {}: {}",
                        opportunity.instrument,
                        e
                    );
                }
            }
        }

        if let Ok(mut retained) = self.high_confidence.lock() {
            *retained = promoted;
        }
        if let Ok(mut last) = self.last_report.lock() {
            *last = Some((
                report.finished_at,
                report.duration_ms(),
                report.scanned,
                report.succeeded,
            ));
        }
        self.latest.send_replace(Some(Arc::new(report.clone())));
    }

    /// Re-run the configured universe every scan interval
    ///
    /// Returns `None` when auto-scan is already running.
    pub fn start_auto_scan(self: &Arc<Self>) -> Option<AutoScanHandle> {
        if self.auto_scan.swap(true, Ordering::SeqCst) {
            tracing::warn!("[SCAN] auto-scan already running");
            return None;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let scanner = Arc::clone(self);

        let task = tokio::spawn(async move {
            let interval = Duration::from_secs(scanner.config.scan_interval_secs.max(1));
            let backoff = Duration::from_secs(scanner.config.error_backoff_secs);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                "🔁 [SCAN] Auto-scan started ({} instruments every {:?})",
                scanner.config.instruments.len(),
                interval
            );

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                let report = scanner
                    .scan_universe(&scanner.config.instruments, scanner.config.timeframe)
                    .await;

                if report.scanned > 0 && report.succeeded == 0 {
                    tracing::error!(
                        "❌ [SCAN] Every instrument failed, backing off {:?}",
                        backoff
                    );
                    tokio::select! {
                        biased;
                        _ = stop_rx.changed() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }

            scanner.auto_scan.store(false, Ordering::SeqCst);
            tracing::info!("🛑 [SCAN] Auto-scan stopped");
        });

        Some(AutoScanHandle { stop_tx, task })
    }
}

async fn evaluate_instrument(
    gateway: &dyn ExchangeGateway,
    analyzer: &MarketStructureAnalyzer,
    instrument: &str,
    timeframe: Timeframe,
    limit: usize,
) -> crate::Result<Opportunity> {
    let history = retry_once("get_ohlcv", || gateway.get_ohlcv(instrument, timeframe, limit)).await?;
    let structure = analyzer.analyze(instrument, &history)?;
    Ok(derive_opportunity(structure, timeframe, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MarketScenario, PaperConfig, PaperGateway};
    use crate::persistence::MemoryJournal;

    fn instruments(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn scanner(paper: PaperGateway, config: ScannerConfig) -> OpportunityScanner {
        OpportunityScanner::new(Arc::new(paper), MarketStructureAnalyzer::default(), config)
    }

    #[tokio::test]
    async fn test_every_instrument_gets_a_slot() {
        let paper = PaperGateway::new(PaperConfig::default());
        paper.add_market("BTC/USDT", MarketScenario::Uptrend, 100.0);
        paper.add_market("ETH/USDT", MarketScenario::Downtrend, 100.0);
        paper.set_history("THIN/USDT", Vec::new());

        let scanner = scanner(paper, ScannerConfig::default());
        let names = instruments(&["BTC/USDT", "ETH/USDT", "THIN/USDT"]);
        let report = scanner.scan_universe(&names, Timeframe::H4).await;

        assert_eq!(report.scanned, 3);
        assert_eq!(report.slots.len(), 3);
        assert_eq!(report.succeeded, 2);
        let slot_names: Vec<&str> = report.slots.iter().map(|s| s.instrument.as_str()).collect();
        assert_eq!(slot_names, vec!["BTC/USDT", "ETH/USDT", "THIN/USDT"]);
        assert!(matches!(report.slots[2].outcome, SlotOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_ranked_descending() {
        let paper = PaperGateway::new(PaperConfig::default());
        let names = instruments(&["A/USDT", "B/USDT", "C/USDT", "D/USDT", "E/USDT", "F/USDT"]);
        for (name, scenario) in names.iter().zip(MarketScenario::ALL.iter().cycle()) {
            paper.add_market(name, *scenario, 50.0);
        }

        let scanner = scanner(paper, ScannerConfig { max_workers: 2, ..ScannerConfig::default() });
        let report = scanner.scan_universe(&names, Timeframe::H4).await;

        assert_eq!(report.succeeded, 6);
        for pair in report.ranked.windows(2) {
            assert!(pair[0].signal_strength >= pair[1].signal_strength);
        }
    }

    #[test]
    fn test_ties_break_by_instrument() {
        use crate::scanner::opportunity::tests::bullish_structure;
        let mut list: Vec<Opportunity> = ["ZEC/USDT", "ADA/USDT", "MKR/USDT"]
            .iter()
            .map(|name| derive_opportunity(bullish_structure(name), Timeframe::H4, Utc::now()))
            .collect();
        rank_opportunities(&mut list);

        let order: Vec<&str> = list.iter().map(|o| o.instrument.as_str()).collect();
        assert_eq!(order, vec!["ADA/USDT", "MKR/USDT", "ZEC/USDT"]);
    }

    #[tokio::test]
    async fn test_publishes_and_persists() {
        let paper = PaperGateway::new(PaperConfig::default());
        paper.add_market("BTC/USDT", MarketScenario::Uptrend, 100.0);
        let journal = Arc::new(MemoryJournal::new());

        let config = ScannerConfig {
            confidence_threshold: 0.0,
            ..ScannerConfig::default()
        };
        let scanner = scanner(paper, config).with_journal(journal.clone());
        let mut rx = scanner.subscribe();
        assert!(rx.borrow().is_none());

        scanner.scan_universe(&instruments(&["BTC/USDT"]), Timeframe::H4).await;

        assert!(rx.has_changed().unwrap());
        let report = rx.borrow_and_update().clone().unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(scanner.high_confidence().len(), 1);
        assert_eq!(journal.opportunities().len(), 1);

        let status = scanner.status();
        assert!(!status.running);
        assert_eq!(status.last_scanned, 1);
        assert_eq!(status.high_confidence, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let paper = PaperGateway::new(PaperConfig::default());
        paper.add_market("BTC/USDT", MarketScenario::Sideways, 100.0);
        paper.fail_next(1);

        let scanner = scanner(paper, ScannerConfig::default());
        let report = scanner.scan_universe(&instruments(&["BTC/USDT"]), Timeframe::H4).await;
        assert_eq!(report.succeeded, 1);
    }

    #[tokio::test]
    async fn test_auto_scan_start_stop() {
        let paper = PaperGateway::new(PaperConfig::default());
        let config = ScannerConfig {
            instruments: instruments(&["BTC/USDT"]),
            ..ScannerConfig::default()
        };
        let scanner = Arc::new(scanner(paper, config));
        let mut rx = scanner.subscribe();

        let handle = scanner.start_auto_scan().unwrap();
        assert!(scanner.start_auto_scan().is_none());

        // The first tick fires immediately
        rx.changed().await.unwrap();
        assert!(scanner.status().auto_scan);

        handle.stop().await;
        assert!(!scanner.status().auto_scan);

        // A manual scan still works afterwards
        let report = scanner.scan_universe(&instruments(&["ETH/USDT"]), Timeframe::H4).await;
        assert_eq!(report.scanned, 1);
    }
}
