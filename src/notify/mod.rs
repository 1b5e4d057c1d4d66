//! Operator notifications.
//!
//! Events are rendered to plain text and handed to a [`Notifier`]. Delivery
//! failures are reported to the caller, which logs them; a lost message never
//! affects trading.

use crate::config::TelegramConfig;
use crate::exchange::OrderSide;
use crate::ledger::{Position, Statistics};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, instrument, warn};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Startup {
        mode: String,
        balance: Decimal,
        min_abs_rate: Decimal,
        trade_notional: Decimal,
        entry_window_secs: u64,
        hold_after_funding_secs: u64,
    },
    PositionOpened {
        symbol: String,
        side: OrderSide,
        size: Decimal,
        entry_price: Decimal,
        funding_rate: Decimal,
        expected_profit: Decimal,
        funding_time: DateTime<Utc>,
    },
    PositionClosed {
        symbol: String,
        side: OrderSide,
        entry_price: Decimal,
        exit_price: Decimal,
        price_pnl: Decimal,
        funding_pnl: Decimal,
        total_pnl: Decimal,
        statistics: Statistics,
    },
    EmergencyStop {
        succeeded: usize,
        failed: usize,
    },
    Shutdown {
        statistics: Statistics,
    },
}

impl NotificationEvent {
    pub fn opened(position: &Position) -> Self {
        Self::PositionOpened {
            symbol: position.symbol.clone(),
            side: position.side,
            size: position.size,
            entry_price: position.entry_price,
            funding_rate: position.funding_rate_at_entry,
            expected_profit: position.expected_funding_profit,
            funding_time: position.funding_time,
        }
    }

    /// `None` while the position is still open.
    pub fn closed(position: &Position, statistics: &Statistics) -> Option<Self> {
        let realized = position.realized()?;
        Some(Self::PositionClosed {
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price: position.exit_price()?,
            price_pnl: realized.price_component,
            funding_pnl: realized.funding_component,
            total_pnl: realized.total,
            statistics: *statistics,
        })
    }

    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Startup { .. } => "startup",
            Self::PositionOpened { .. } => "position_opened",
            Self::PositionClosed { .. } => "position_closed",
            Self::EmergencyStop { .. } => "emergency_stop",
            Self::Shutdown { .. } => "shutdown",
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Startup {
                mode,
                balance,
                min_abs_rate,
                trade_notional,
                entry_window_secs,
                hold_after_funding_secs,
            } => format!(
                "🚀 Funding fee sniper started ({mode})\n\
                 💰 Balance: {} USDT\n\
                 📊 Min funding rate: {}%\n\
                 💵 Trade size: {trade_notional} USDT\n\
                 ⏱ Entry {entry_window_secs}s before funding, exit {hold_after_funding_secs}s after",
                balance.round_dp(2),
                percent(*min_abs_rate),
            ),
            Self::PositionOpened {
                symbol,
                side,
                size,
                entry_price,
                funding_rate,
                expected_profit,
                funding_time,
            } => format!(
                "🟢 Opened {} {symbol}\n\
                 Size: {size} @ {entry_price}\n\
                 Funding rate: {}%\n\
                 Expected funding: {} USDT\n\
                 Payout at {}",
                side_label(*side),
                percent(*funding_rate),
                expected_profit.round_dp(6),
                funding_time.format("%H:%M:%S UTC"),
            ),
            Self::PositionClosed {
                symbol,
                side,
                entry_price,
                exit_price,
                price_pnl,
                funding_pnl,
                total_pnl,
                statistics,
            } => format!(
                "{} Closed {} {symbol}\n\
                 Entry {entry_price} -> exit {exit_price}\n\
                 Price PnL: {} USDT\n\
                 Funding PnL: {} USDT\n\
                 Total PnL: {} USDT\n\
                 Trades: {} ({}% successful), total PnL {} USDT",
                if *total_pnl > Decimal::ZERO { "✅" } else { "🔻" },
                side_label(*side),
                price_pnl.round_dp(6),
                funding_pnl.round_dp(6),
                total_pnl.round_dp(6),
                statistics.total_trades,
                statistics.success_rate().round_dp(1),
                statistics.total_pnl.round_dp(6),
            ),
            Self::EmergencyStop { succeeded, failed } => format!(
                "🚨 Emergency stop: all positions closed\nSucceeded: {succeeded}, failed: {failed}"
            ),
            Self::Shutdown { statistics } => format!(
                "🛑 Funding fee sniper stopped\n\
                 Trades: {}, successful: {} ({}%)\n\
                 Total PnL: {} USDT",
                statistics.total_trades,
                statistics.successful_trades,
                statistics.success_rate().round_dp(1),
                statistics.total_pnl.round_dp(6),
            ),
        }
    }
}

fn side_label(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "LONG",
        OrderSide::Sell => "SHORT",
    }
}

fn percent(rate: Decimal) -> Decimal {
    crate::utils::to_percent(rate).round_dp(4)
}

/// Delivery channel for operator notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<()>;
}

/// Writes notifications to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        info!(kind = event.kind(), "📣 {}", event.render().replace('\n', " | "));
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Telegram Bot API notifier.
pub struct TelegramNotifier {
    http: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        Self::with_base_url(config, TELEGRAM_API_URL)
    }

    pub fn with_base_url(config: &TelegramConfig, base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    #[instrument(skip(self, event), fields(kind = event.kind()))]
    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let text = event.render();
        let response = self
            .http
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text: &text,
            })
            .send()
            .await
            .context("Failed to send Telegram message")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Telegram rejected message");
            anyhow::bail!("Telegram sendMessage returned {status}: {body}");
        }
        Ok(())
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("notification buffer poisoned"))?
            .push(event.clone());
        Ok(())
    }
}
