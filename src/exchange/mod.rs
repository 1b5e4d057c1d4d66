//! Exchange integrations for funding fee sniping.
//!
//! ## Rate source
//! The trading core depends only on the [`RateSource`] trait. Wrap any
//! implementation in [`Throttled`] to share one minimum request interval and
//! bound every call with a timeout.
//!
//! ## Bybit
//! REST access to linear perpetuals:
//! - Funding schedule and last prices (tickers)
//! - Instrument quantity rules
//! - Market orders and wallet balance
//!
//! ## Paper trading
//! [`MockExchange`] simulates fills; [`PaperExchange`] combines it with a live
//! market-data source.

mod client;
pub mod mock;
mod paper;
mod rate_limit;
mod traits;
mod types;

pub use client::{quote_from_ticker, BybitClient};
pub use mock::MockExchange;
pub use paper::PaperExchange;
pub use rate_limit::{RequestThrottle, Throttled};
pub use traits::{FundingQuote, RateSource, ScheduleSnapshot};
pub use types::*;
