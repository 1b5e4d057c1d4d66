//! # Funding Fee Sniper
//!
//! Captures single funding payments on Bybit linear perpetuals: open a
//! position on the receiving side a few seconds before settlement, close it
//! shortly after the payout.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `error`: Error taxonomy shared by the strategy and the monitor loop
//! - `exchange`: Bybit v5 REST client, paper broker and request throttling
//! - `ledger`: Open positions, closed history and trade statistics
//! - `strategy`: Candidate ranking, entry and exit scheduling
//! - `monitor`: The poll/evaluate/publish loop and its shutdown sequence
//! - `notify`: Telegram and log notifications
//! - `persistence`: JSON status reports and the SQLite trade journal
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod monitor;
pub mod notify;
pub mod persistence;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{SniperError, SniperResult};
