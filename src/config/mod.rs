//! Configuration management for the funding fee sniper.
//!
//! Loads settings from an optional config file and environment variables.
//! The flat variable names used by earlier deployments of the bot
//! (`BYBIT_API_KEY`, `MIN_FUNDING_RATE`, ...) are honoured as overrides.

use crate::error::SniperError;
use crate::strategy::SelectionMode;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bybit API credentials
    #[serde(default)]
    pub bybit: BybitConfig,
    /// Candidate selection and entry/exit timing
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Loop cadence and rate limiting
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Output file locations
    #[serde(default)]
    pub output: OutputConfig,
    /// Optional Telegram notifications
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BybitConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret used to sign requests
    #[serde(default)]
    pub api_secret: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Minimum absolute predicted funding rate to consider a symbol
    #[serde(default = "default_min_abs_rate")]
    pub min_abs_rate: Decimal,
    /// Notional per trade in the quote asset
    #[serde(default = "default_trade_notional")]
    pub trade_notional: Decimal,
    /// Open a position at most this many seconds before funding
    #[serde(default = "default_entry_window_secs")]
    pub entry_window_secs: u64,
    /// Close a position once this many seconds have passed since payout
    #[serde(default = "default_hold_after_funding_secs")]
    pub hold_after_funding_secs: u64,
    /// Candidates kept per ranking (per sign in split mode)
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Global top-N or top-N positive plus top-N negative
    #[serde(default)]
    pub selection_mode: SelectionMode,
    /// Asset used for balance queries
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sleep between successful cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Sleep after a failed schedule refresh
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Minimum spacing between any two exchange calls
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
    /// A single exchange call taking longer than this is treated as failed
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Reload instrument metadata once it is older than this
    #[serde(default = "default_metadata_refresh_secs")]
    pub metadata_refresh_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_status_path")]
    pub status_path: String,
    #[serde(default = "default_schedule_path")]
    pub schedule_path: String,
    #[serde(default = "default_journal_path")]
    pub journal_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

// Default value functions
fn default_min_abs_rate() -> Decimal {
    Decimal::new(1, 4) // 0.0001 (0.01%)
}

fn default_trade_notional() -> Decimal {
    Decimal::new(10, 0) // 10 USDT
}

fn default_entry_window_secs() -> u64 {
    10
}

fn default_hold_after_funding_secs() -> u64 {
    30
}

fn default_top_n() -> usize {
    20
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_error_backoff_secs() -> u64 {
    30
}

fn default_min_request_interval_ms() -> u64 {
    100
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_metadata_refresh_secs() -> u64 {
    3600
}

fn default_status_path() -> String {
    "bot_status.json".to_string()
}

fn default_schedule_path() -> String {
    "funding_rates.json".to_string()
}

fn default_journal_path() -> String {
    "data/trades.db".to_string()
}

/// Flat environment names from earlier deployments, mapped onto config keys.
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("BYBIT_API_KEY", "bybit.api_key"),
    ("BYBIT_API_SECRET", "bybit.api_secret"),
    ("TRADE_AMOUNT_USDT", "strategy.trade_notional"),
    ("MIN_FUNDING_RATE", "strategy.min_abs_rate"),
    ("SECONDS_BEFORE_FUNDING", "strategy.entry_window_secs"),
    ("SECONDS_AFTER_FUNDING_TO_CLOSE", "strategy.hold_after_funding_secs"),
    ("TOP_PAIRS_COUNT", "strategy.top_n"),
    ("TELEGRAM_BOT_TOKEN", "telegram.bot_token"),
    ("TELEGRAM_USER_ID", "telegram.chat_id"),
];

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("SNIPER"));

        for (var, key) in LEGACY_ENV_KEYS {
            let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
            builder = builder
                .set_override_option(*key, value)
                .with_context(|| format!("Failed to apply {var}"))?;
        }

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.strategy.min_abs_rate >= Decimal::ZERO,
            "min_abs_rate must not be negative"
        );

        anyhow::ensure!(
            self.strategy.trade_notional > Decimal::ZERO,
            "trade_notional must be positive"
        );

        anyhow::ensure!(
            self.strategy.entry_window_secs > 0,
            "entry_window_secs must be at least 1"
        );

        anyhow::ensure!(self.strategy.top_n >= 1, "top_n must be at least 1");

        anyhow::ensure!(
            self.monitor.poll_interval_secs > 0 && self.monitor.error_backoff_secs > 0,
            "poll and backoff intervals must be positive"
        );

        anyhow::ensure!(
            self.monitor.request_timeout_secs > 0,
            "request_timeout_secs must be positive"
        );

        Ok(())
    }

    /// Live trading needs signed requests; paper mode only reads public data.
    pub fn require_credentials(&self) -> Result<(), SniperError> {
        if self.bybit.api_key.is_empty() || self.bybit.api_secret.is_empty() {
            return Err(SniperError::Configuration(
                "BYBIT_API_KEY and BYBIT_API_SECRET must be set for live trading".to_string(),
            ));
        }
        Ok(())
    }
}

impl StrategyConfig {
    pub fn entry_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.entry_window_secs as i64)
    }

    pub fn hold_after_funding(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.hold_after_funding_secs as i64)
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn metadata_refresh(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.metadata_refresh_secs as i64)
    }
}

impl TelegramConfig {
    pub fn is_enabled(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bybit: BybitConfig::default(),
            strategy: StrategyConfig::default(),
            monitor: MonitorConfig::default(),
            output: OutputConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_abs_rate: default_min_abs_rate(),
            trade_notional: default_trade_notional(),
            entry_window_secs: default_entry_window_secs(),
            hold_after_funding_secs: default_hold_after_funding_secs(),
            top_n: default_top_n(),
            selection_mode: SelectionMode::default(),
            quote_asset: default_quote_asset(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            min_request_interval_ms: default_min_request_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            metadata_refresh_secs: default_metadata_refresh_secs(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            status_path: default_status_path(),
            schedule_path: default_schedule_path(),
            journal_path: default_journal_path(),
        }
    }
}
