use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smcbot::analysis::MarketStructureAnalyzer;
use smcbot::config::AppConfig;
use smcbot::execution::{PerformanceStats, TradeManager};
use smcbot::gateway::{ExchangeGateway, PaperGateway, RateLimitedGateway};
use smcbot::models::Timeframe;
use smcbot::notify::LogNotifier;
use smcbot::persistence::{Journal, MemoryJournal, PostgresJournal};
use smcbot::scanner::{OpportunityScanner, ScanReport, SlotOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "smcbot")]
#[command(about = "Market-structure scanner and auto-trading engine")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run auto-scan and the trading loop until Ctrl+C
    Run {
        /// Override the configured instruments (comma separated)
        #[arg(long, value_delimiter = ',')]
        instruments: Vec<String>,

        /// Trade only on the fallback signal, without scanning
        #[arg(long)]
        no_auto_scan: bool,
    },
    /// Scan once and print the ranking
    Scan {
        #[arg(long)]
        timeframe: Option<Timeframe>,

        #[arg(long, value_delimiter = ',')]
        instruments: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            instruments,
            no_auto_scan,
        } => {
            if !instruments.is_empty() {
                config.scanner.instruments = instruments;
            }
            run(config, no_auto_scan).await
        }
        Command::Scan {
            timeframe,
            instruments,
        } => {
            if !instruments.is_empty() {
                config.scanner.instruments = instruments;
            }
            let timeframe = timeframe.unwrap_or(config.scanner.timeframe);
            scan(config, timeframe).await
        }
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("smcbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ============================================================================
// Wiring
// ============================================================================

fn build_gateway(config: &AppConfig) -> Arc<dyn ExchangeGateway> {
    tracing::info!(
        "📝 Paper venue: ${:.2} starting balance, {} req/min",
        config.paper.starting_balance,
        config.requests_per_minute
    );
    let paper = PaperGateway::new(config.paper.clone());
    Arc::new(RateLimitedGateway::new(paper, config.requests_per_minute))
}

async fn open_journal(config: &AppConfig) -> Result<Arc<dyn Journal>> {
    match &config.database_url {
        Some(url) => {
            let journal = PostgresJournal::connect(url)
                .await
                .context("Failed to connect to Postgres journal")?;
            tracing::info!("Postgres journal enabled (opportunities, positions, trades)");
            Ok(Arc::new(journal))
        }
        None => {
            tracing::info!("No DATABASE_URL set, journaling in memory only");
            Ok(Arc::new(MemoryJournal::new()))
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run(config: AppConfig, no_auto_scan: bool) -> Result<()> {
    tracing::info!("🚀 smcbot starting");
    tracing::info!("📊 Configuration: {}", config.digest());

    let gateway = build_gateway(&config);
    let journal = open_journal(&config).await?;

    let scanner = Arc::new(
        OpportunityScanner::new(
            gateway.clone(),
            MarketStructureAnalyzer::new(config.analyzer.clone()),
            config.scanner.clone(),
        )
        .with_journal(journal.clone()),
    );

    let mut manager = TradeManager::new(
        config.trading.clone(),
        config.risk.clone(),
        config.stops.clone(),
        gateway,
        journal,
        Arc::new(LogNotifier),
    )
    .with_opportunities(
        scanner.subscribe(),
        config.scanner.scan_interval_secs,
        config.scanner.confidence_threshold,
    )
    .with_instruments(config.scanner.instruments.clone());

    let recovered = manager
        .recover()
        .await
        .context("Failed to recover open positions")?;
    tracing::info!("✓ {} open positions under management", recovered);

    let auto_scan = if no_auto_scan {
        tracing::info!("Auto-scan disabled; entries come from the technical signal only");
        None
    } else {
        scanner.start_auto_scan()
    };
    let (handle, task) = manager.spawn();

    tracing::info!("\nPress Ctrl+C to stop...\n");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");

    if let Some(auto_scan) = auto_scan {
        auto_scan.stop().await;
    }

    let report = handle.emergency_stop().await?;
    tracing::info!(
        "Emergency stop: {} closed, {} failed, realized ${:.2}",
        report.closed.len(),
        report.failed.len(),
        report.realized_pnl
    );
    for (id, error) in &report.failed {
        tracing::error!("  ✗ {} still open at the venue: {}", id, error);
    }

    handle.shutdown().await?;
    let manager = task.await.context("Trading task panicked")?;
    print_performance(&manager.performance());

    tracing::info!("👋 smcbot stopped");
    Ok(())
}

async fn scan(config: AppConfig, timeframe: Timeframe) -> Result<()> {
    let scanner = OpportunityScanner::new(
        build_gateway(&config),
        MarketStructureAnalyzer::new(config.analyzer.clone()),
        config.scanner.clone(),
    );

    let report = scanner
        .scan_universe(&config.scanner.instruments, timeframe)
        .await;
    print_ranking(&report, config.scanner.confidence_threshold);
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_ranking(report: &ScanReport, threshold: f64) {
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║              OPPORTUNITY RANKING ({:<4})               ║", report.timeframe.as_str());
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "{:<14} {:>6} {:>9} {:>7} {:>10} {:>11} {:>11}",
        "Instrument", "Dir", "Strength", "Tier", "R:R", "Stop", "Target"
    );
    println!("{}", "─".repeat(74));

    for opportunity in &report.ranked {
        let marker = if opportunity.signal_strength >= threshold { "⭐" } else { "  " };
        println!(
            "{:<14} {:>6} {:>9.3} {:>7} {:>10.2} {:>11} {:>11} {}",
            opportunity.instrument,
            opportunity.direction.to_string(),
            opportunity.signal_strength,
            format!("{:?}", opportunity.risk_tier),
            opportunity.reward_risk_ratio,
            opportunity
                .best_stop()
                .map_or("-".to_string(), |p| format!("{:.4}", p)),
            opportunity
                .best_target()
                .map_or("-".to_string(), |p| format!("{:.4}", p)),
            marker
        );
    }

    for slot in report.failures() {
        let why = match &slot.outcome {
            SlotOutcome::Failed(error) => error.clone(),
            SlotOutcome::TimedOut => "timed out".to_string(),
            SlotOutcome::Evaluated(_) => continue,
        };
        println!("{:<14} ✗ {}", slot.instrument, why);
    }

    println!(
        "\n{} scanned, {} succeeded in {}ms\n",
        report.scanned,
        report.succeeded,
        report.duration_ms()
    );
}

fn print_performance(stats: &PerformanceStats) {
    if stats.total_trades == 0 {
        println!("\nNo closed trades this session.\n");
        return;
    }

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║                 SESSION PERFORMANCE                   ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");
    println!("  Trades:        {}", stats.total_trades);
    println!(
        "  Win rate:      {:.1}% ({}W / {}L)",
        stats.win_rate, stats.winning_trades, stats.losing_trades
    );
    println!("  Total P&L:     ${:.2}", stats.total_pnl);
    println!("  Avg P&L:       ${:.2}", stats.avg_pnl);
    println!("  Profit factor: {:.2}", stats.profit_factor);
    println!(
        "  Largest:       +${:.2} / -${:.2}",
        stats.largest_win,
        stats.largest_loss.abs()
    );
    for (reason, count) in &stats.by_reason {
        println!("  {:<14} {}", format!("{}:", reason), count);
    }
    println!();
}
