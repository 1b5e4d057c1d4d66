//! Mock exchange for paper trading and tests.

use super::traits::{FundingQuote, RateSource, ScheduleSnapshot};
use super::types::{InstrumentRules, OrderSide};
use crate::error::SniperError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Simulated net position for one symbol.
#[derive(Debug, Clone)]
pub struct MockPosition {
    pub symbol: String,
    /// Positive = long, negative = short
    pub net_qty: Decimal,
    pub entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
    /// Total funding received while the position was held
    pub total_funding_received: Decimal,
    pub funding_collections: u32,
}

impl MockPosition {
    fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            net_qty: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            opened_at: Utc::now(),
            total_funding_received: Decimal::ZERO,
            funding_collections: 0,
        }
    }
}

/// Mock trading state for paper trading.
#[derive(Debug, Clone)]
pub struct MockTradingState {
    pub initial_balance: Decimal,
    pub balance: Decimal,
    pub positions: HashMap<String, MockPosition>,
    pub total_funding_received: Decimal,
    pub total_trading_fees: Decimal,
    pub realized_trading_pnl: Decimal,
    pub order_count: u64,
}

impl MockTradingState {
    fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            balance: initial_balance,
            positions: HashMap::new(),
            total_funding_received: Decimal::ZERO,
            total_trading_fees: Decimal::ZERO,
            realized_trading_pnl: Decimal::ZERO,
            order_count: 0,
        }
    }
}

/// Failures the mock should produce on demand.
#[derive(Debug, Default)]
struct ScriptedFailures {
    schedule: bool,
    quotes: HashSet<String>,
    orders: HashSet<String>,
    next_orders: u32,
}

/// Mock exchange that fills market orders at the last known price.
pub struct MockExchange {
    state: Arc<RwLock<MockTradingState>>,
    order_id_counter: AtomicU64,
    schedule: Arc<RwLock<HashMap<String, FundingQuote>>>,
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
    instruments: Arc<RwLock<HashMap<String, InstrumentRules>>>,
    failures: RwLock<ScriptedFailures>,
    /// Taker fee (0.055%)
    fee_rate: Decimal,
}

/// Rules applied to symbols with no explicit instrument metadata.
const DEFAULT_RULES: InstrumentRules = InstrumentRules {
    qty_step: dec!(0.001),
    min_order_qty: dec!(0.001),
};

impl MockExchange {
    /// Create a new mock exchange with an initial balance.
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            state: Arc::new(RwLock::new(MockTradingState::new(initial_balance))),
            order_id_counter: AtomicU64::new(1),
            schedule: Arc::new(RwLock::new(HashMap::new())),
            prices: Arc::new(RwLock::new(HashMap::new())),
            instruments: Arc::new(RwLock::new(HashMap::new())),
            failures: RwLock::new(ScriptedFailures::default()),
            fee_rate: dec!(0.00055),
        }
    }

    /// Replace the funding schedule. Quote prices become the fill prices.
    pub async fn set_schedule(&self, quotes: impl IntoIterator<Item = FundingQuote>) {
        let mut schedule = self.schedule.write().await;
        let mut prices = self.prices.write().await;
        schedule.clear();
        for quote in quotes {
            prices.insert(quote.symbol.clone(), quote.last_price);
            schedule.insert(quote.symbol.clone(), quote);
        }
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    pub async fn set_instrument(&self, symbol: &str, rules: InstrumentRules) {
        self.instruments
            .write()
            .await
            .insert(symbol.to_string(), rules);
    }

    // ==================== Scripted failures ====================

    pub async fn fail_schedule(&self, fail: bool) {
        self.failures.write().await.schedule = fail;
    }

    pub async fn fail_quote(&self, symbol: &str) {
        self.failures.write().await.quotes.insert(symbol.to_string());
    }

    /// Reject every order for `symbol` until failures are cleared.
    pub async fn fail_orders(&self, symbol: &str) {
        self.failures.write().await.orders.insert(symbol.to_string());
    }

    /// Reject the next `count` orders regardless of symbol.
    pub async fn fail_next_orders(&self, count: u32) {
        self.failures.write().await.next_orders = count;
    }

    pub async fn clear_failures(&self) {
        *self.failures.write().await = ScriptedFailures::default();
    }

    // ==================== Inspection ====================

    /// Get current mock state for logging.
    pub async fn get_state(&self) -> MockTradingState {
        self.state.read().await.clone()
    }

    /// Signed net quantity held for a symbol.
    pub async fn net_position(&self, symbol: &str) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .get(symbol)
            .map(|p| p.net_qty)
            .unwrap_or(Decimal::ZERO)
    }

    /// Merge a fresh schedule observation and settle funding for every symbol
    /// whose payout has passed since it was last seen.
    ///
    /// A payout counts as passed once the observed next funding time moves
    /// forward; the rate that was predicted before the move is the one paid.
    /// Returns symbol -> funding received.
    pub async fn roll_schedule(
        &self,
        quotes: impl IntoIterator<Item = FundingQuote>,
    ) -> HashMap<String, Decimal> {
        let mut state = self.state.write().await;
        let mut schedule = self.schedule.write().await;
        let mut prices = self.prices.write().await;

        let mut total_funding = Decimal::ZERO;
        let mut per_position = HashMap::new();

        for quote in quotes {
            let settled_rate = schedule
                .get(&quote.symbol)
                .filter(|previous| quote.next_funding_time > previous.next_funding_time)
                .map(|previous| previous.predicted_rate);

            if let (Some(rate), Some(position)) =
                (settled_rate, state.positions.get_mut(&quote.symbol))
            {
                if !position.net_qty.is_zero() {
                    // Longs pay shorts when the rate is positive
                    let funding = -(position.net_qty * quote.last_price) * rate;
                    position.total_funding_received += funding;
                    position.funding_collections += 1;
                    total_funding += funding;
                    per_position.insert(quote.symbol.clone(), funding);

                    debug!(
                        symbol = %quote.symbol,
                        net_qty = %position.net_qty,
                        funding_rate = %rate,
                        funding_received = %funding,
                        "Funding payment"
                    );
                }
            }

            prices.insert(quote.symbol.clone(), quote.last_price);
            schedule.insert(quote.symbol.clone(), quote);
        }

        if !per_position.is_empty() {
            state.total_funding_received += total_funding;
            state.balance += total_funding;
            info!(
                funding_this_period = %total_funding,
                balance = %state.balance,
                "Funding collected"
            );
        }

        per_position
    }

    fn next_order_id(&self) -> u64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    async fn check_order_failure(&self, symbol: &str) -> Result<(), SniperError> {
        let mut failures = self.failures.write().await;
        if failures.next_orders > 0 {
            failures.next_orders -= 1;
            return Err(SniperError::OrderRejected {
                symbol: symbol.to_string(),
                reason: "simulated rejection".to_string(),
            });
        }
        if failures.orders.contains(symbol) {
            return Err(SniperError::OrderRejected {
                symbol: symbol.to_string(),
                reason: "simulated rejection".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RateSource for MockExchange {
    async fn get_funding_schedule(&self) -> Result<ScheduleSnapshot> {
        if self.failures.read().await.schedule {
            anyhow::bail!("simulated schedule outage");
        }
        let schedule = self.schedule.read().await;
        Ok(ScheduleSnapshot::new(schedule.values().cloned(), Utc::now()))
    }

    async fn get_quote(&self, symbol: &str) -> Result<Decimal> {
        if self.failures.read().await.quotes.contains(symbol) {
            anyhow::bail!("simulated quote failure for {symbol}");
        }
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no price for {symbol}"))
    }

    async fn resolve_order_size(&self, symbol: &str, notional: Decimal) -> Result<Decimal> {
        let price = self.get_quote(symbol).await?;
        let rules = self
            .instruments
            .read()
            .await
            .get(symbol)
            .copied()
            .unwrap_or(DEFAULT_RULES);
        Ok(rules.size_for_notional(notional, price))
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<String> {
        self.check_order_failure(symbol).await?;

        if quantity <= Decimal::ZERO {
            return Err(SniperError::OrderRejected {
                symbol: symbol.to_string(),
                reason: format!("invalid quantity {quantity}"),
            }
            .into());
        }

        let price = self
            .prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no price for {symbol}"))?;

        let mut state = self.state.write().await;
        let position = state
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| MockPosition::flat(symbol));

        let delta = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };

        let reduces = !position.net_qty.is_zero()
            && position.net_qty.is_sign_positive() != delta.is_sign_positive();
        if reduce_only && (!reduces || quantity > position.net_qty.abs()) {
            return Err(SniperError::OrderRejected {
                symbol: symbol.to_string(),
                reason: format!(
                    "reduce-only {side} {quantity} against net {}",
                    position.net_qty
                ),
            }
            .into());
        }

        let mut realized = Decimal::ZERO;
        if reduces {
            let closed = quantity.min(position.net_qty.abs());
            let direction = if position.net_qty > Decimal::ZERO {
                Decimal::ONE
            } else {
                -Decimal::ONE
            };
            realized = (price - position.entry_price) * closed * direction;
            position.net_qty += delta;
            if position.net_qty.is_zero() {
                position.entry_price = Decimal::ZERO;
            } else if position.net_qty.is_sign_positive() == delta.is_sign_positive() {
                // Flipped through zero; the remainder opened at this price
                position.entry_price = price;
                position.opened_at = Utc::now();
            }
        } else {
            let held = position.net_qty.abs();
            if held.is_zero() {
                position.opened_at = Utc::now();
            }
            position.entry_price = (position.entry_price * held + price * quantity) / (held + quantity);
            position.net_qty += delta;
        }

        let fee = quantity * price * self.fee_rate;
        state.balance += realized - fee;
        state.realized_trading_pnl += realized;
        state.total_trading_fees += fee;
        state.order_count += 1;

        let order_id = format!("mock-{}", self.next_order_id());

        info!(
            %order_id,
            %symbol,
            side = ?side,
            quantity = %quantity,
            price = %price,
            fee = %fee,
            reduce_only,
            "Mock order executed"
        );

        Ok(order_id)
    }

    async fn get_balance(&self, _asset: &str) -> Result<Decimal> {
        Ok(self.state.read().await.balance)
    }

    async fn load_symbols(&self) -> Result<usize> {
        Ok(self.instruments.read().await.len())
    }
}
