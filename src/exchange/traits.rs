//! Venue-agnostic capability surface consumed by the trading core.
//!
//! The monitor loop and schedulers only ever talk to a [`RateSource`]:
//! - funding schedule snapshots
//! - last-price quotes
//! - order sizing from a notional budget
//! - market order submission
//! - wallet balance
//! - symbol metadata loading

use super::types::OrderSide;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// Predicted funding for one perpetual contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundingQuote {
    pub symbol: String,
    /// Signed fraction, e.g. 0.0001 = 0.01% per interval
    pub predicted_rate: Decimal,
    pub next_funding_time: DateTime<Utc>,
    pub last_price: Decimal,
}

impl FundingQuote {
    pub fn new(
        symbol: impl Into<String>,
        predicted_rate: Decimal,
        next_funding_time: DateTime<Utc>,
        last_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            predicted_rate,
            next_funding_time,
            last_price,
        }
    }
}

/// Funding schedule as of one poll. Replaced wholesale on every refresh.
#[derive(Debug, Clone)]
pub struct ScheduleSnapshot {
    quotes: HashMap<String, FundingQuote>,
    fetched_at: DateTime<Utc>,
}

impl ScheduleSnapshot {
    /// Build a snapshot; a later quote for the same symbol replaces an earlier one.
    pub fn new(quotes: impl IntoIterator<Item = FundingQuote>, fetched_at: DateTime<Utc>) -> Self {
        let quotes = quotes
            .into_iter()
            .map(|q| (q.symbol.clone(), q))
            .collect();
        Self { quotes, fetched_at }
    }

    pub fn empty(fetched_at: DateTime<Utc>) -> Self {
        Self {
            quotes: HashMap::new(),
            fetched_at,
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&FundingQuote> {
        self.quotes.get(symbol)
    }

    pub fn quotes(&self) -> impl Iterator<Item = &FundingQuote> {
        self.quotes.values()
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

/// Exchange operations the trading core depends on.
///
/// Implementations are not required to rate-limit themselves; wrap them in
/// [`super::Throttled`] to enforce the shared minimum request interval and a
/// per-call timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Current funding schedule for all tradable perpetuals (may be partial).
    async fn get_funding_schedule(&self) -> anyhow::Result<ScheduleSnapshot>;

    /// Last traded price for a symbol.
    async fn get_quote(&self, symbol: &str) -> anyhow::Result<Decimal>;

    /// Order quantity for a notional budget, rounded down to the quantity step.
    ///
    /// Returns zero when the rounded quantity is below the instrument minimum.
    async fn resolve_order_size(&self, symbol: &str, notional: Decimal)
        -> anyhow::Result<Decimal>;

    /// Submit a market order and return the exchange order id.
    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> anyhow::Result<String>;

    /// Wallet balance for an asset.
    async fn get_balance(&self, asset: &str) -> anyhow::Result<Decimal>;

    /// Load symbol metadata (quantity step, minimum size). Returns symbol count.
    async fn load_symbols(&self) -> anyhow::Result<usize> {
        Ok(0)
    }
}

/// Lets a shared source be wrapped (for example in `Throttled`) while the
/// caller keeps a handle to it.
#[async_trait]
impl<T: RateSource + ?Sized> RateSource for std::sync::Arc<T> {
    async fn get_funding_schedule(&self) -> anyhow::Result<ScheduleSnapshot> {
        (**self).get_funding_schedule().await
    }

    async fn get_quote(&self, symbol: &str) -> anyhow::Result<Decimal> {
        (**self).get_quote(symbol).await
    }

    async fn resolve_order_size(
        &self,
        symbol: &str,
        notional: Decimal,
    ) -> anyhow::Result<Decimal> {
        (**self).resolve_order_size(symbol, notional).await
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> anyhow::Result<String> {
        (**self)
            .submit_order(symbol, side, quantity, reduce_only)
            .await
    }

    async fn get_balance(&self, asset: &str) -> anyhow::Result<Decimal> {
        (**self).get_balance(asset).await
    }

    async fn load_symbols(&self) -> anyhow::Result<usize> {
        (**self).load_symbols().await
    }
}
