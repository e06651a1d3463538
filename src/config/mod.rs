// Application configuration
// Defaults, then an optional file, then SMCBOT__* environment variables
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::analysis::AnalyzerConfig;
use crate::execution::TradeManagerConfig;
use crate::gateway::PaperConfig;
use crate::risk::RiskLimits;
use crate::scanner::ScannerConfig;
use crate::stoploss::StopConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub trading: TradeManagerConfig,
    pub risk: RiskLimits,
    pub scanner: ScannerConfig,
    pub analyzer: AnalyzerConfig,
    pub stops: StopConfig,
    pub paper: PaperConfig,
    /// Journal database; the in-memory journal is used when unset
    pub database_url: Option<String>,
    /// Venue request budget shared by every component
    pub requests_per_minute: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            trading: TradeManagerConfig::default(),
            risk: RiskLimits::default(),
            scanner: ScannerConfig::default(),
            analyzer: AnalyzerConfig::default(),
            stops: StopConfig::default(),
            paper: PaperConfig::default(),
            database_url: None,
            requests_per_minute: 1200,
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            // Override with environment variables (SMCBOT__SECTION__KEY)
            .add_source(
                Environment::with_prefix("SMCBOT")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("scanner.instruments"),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if app_config.database_url.is_none() {
            app_config.database_url = std::env::var("DATABASE_URL").ok();
        }

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.trading.tick_secs > 0, "trading.tick_secs must be positive");
        anyhow::ensure!(
            self.trading.default_leverage >= 1
                && self.trading.default_leverage <= self.trading.max_leverage,
            "trading.default_leverage must be between 1 and trading.max_leverage"
        );
        anyhow::ensure!(
            self.risk.risk_percent > 0.0 && self.risk.risk_percent < 1.0,
            "risk.risk_percent must be in (0, 1)"
        );
        anyhow::ensure!(self.risk.max_positions > 0, "risk.max_positions must be positive");
        anyhow::ensure!(self.scanner.max_workers > 0, "scanner.max_workers must be positive");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.scanner.confidence_threshold),
            "scanner.confidence_threshold must be in [0, 1]"
        );
        anyhow::ensure!(
            self.analyzer.min_history >= 2,
            "analyzer.min_history must be at least 2"
        );
        Ok(())
    }

    /// One-line summary for the startup log
    pub fn digest(&self) -> String {
        format!(
            "instruments={:?} timeframe={} workers={} threshold={:.2} tick={}s max_positions={} risk={:.1}% leverage={}x journal={}",
            self.scanner.instruments,
            self.scanner.timeframe,
            self.scanner.max_workers,
            self.scanner.confidence_threshold,
            self.trading.tick_secs,
            self.risk.max_positions,
            self.risk.risk_percent * 100.0,
            self.trading.default_leverage,
            if self.database_url.is_some() { "postgres" } else { "memory" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        tokio_test::assert_ok!(config.validate());
        assert_eq!(config.trading.tick_secs, 10);
        assert_eq!(config.risk.cooldown_secs, 300);
        assert_eq!(config.scanner.max_workers, 5);
        assert_eq!(config.scanner.scan_interval_secs, 1800);
        assert_eq!(config.stops.atr_period, 14);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("smcbot-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "[risk]\nmax_positions = 1\n\n[scanner]\ninstruments = [\"BTC/USDT\"]\ntimeframe = \"1h\"\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.risk.max_positions, 1);
        assert_eq!(config.scanner.instruments, vec!["BTC/USDT".to_string()]);
        assert_eq!(config.scanner.timeframe, crate::models::Timeframe::H1);
        // Untouched sections keep their defaults
        assert_eq!(config.risk.risk_percent, 0.02);
        assert_eq!(config.trading.tick_secs, 10);
    }

    #[test]
    fn test_invalid_leverage_rejected() {
        let mut config = AppConfig::default();
        config.trading.default_leverage = 50;
        assert!(config.validate().is_err());
    }
}
