//! Paper trading: live market data, simulated fills.

use super::mock::MockExchange;
use super::traits::{RateSource, ScheduleSnapshot};
use super::types::OrderSide;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

/// Routes schedule, quotes and sizing to a market-data source and
/// orders and balance to a [`MockExchange`]. Every schedule and price observed
/// on the market side is pushed into the broker, so fills track the live
/// market and held positions are credited when a payout passes.
pub struct PaperExchange<M> {
    market: M,
    broker: MockExchange,
}

impl<M: RateSource> PaperExchange<M> {
    pub fn new(market: M, broker: MockExchange) -> Self {
        Self { market, broker }
    }

    pub fn broker(&self) -> &MockExchange {
        &self.broker
    }

    pub fn market(&self) -> &M {
        &self.market
    }
}

#[async_trait]
impl<M: RateSource> RateSource for PaperExchange<M> {
    async fn get_funding_schedule(&self) -> Result<ScheduleSnapshot> {
        let snapshot = self.market.get_funding_schedule().await?;
        let funding = self.broker.roll_schedule(snapshot.quotes().cloned()).await;
        for (symbol, amount) in &funding {
            info!(%symbol, %amount, "💰 [PAPER] Funding settled");
        }
        Ok(snapshot)
    }

    async fn get_quote(&self, symbol: &str) -> Result<Decimal> {
        let price = self.market.get_quote(symbol).await?;
        self.broker.set_price(symbol, price).await;
        Ok(price)
    }

    async fn resolve_order_size(&self, symbol: &str, notional: Decimal) -> Result<Decimal> {
        self.market.resolve_order_size(symbol, notional).await
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<String> {
        self.broker
            .submit_order(symbol, side, quantity, reduce_only)
            .await
    }

    async fn get_balance(&self, asset: &str) -> Result<Decimal> {
        self.broker.get_balance(asset).await
    }

    async fn load_symbols(&self) -> Result<usize> {
        self.market.load_symbols().await
    }
}
