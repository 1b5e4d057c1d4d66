//! Position record and its Open -> Closed lifecycle.

use crate::exchange::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Stable internal identifier, independent of the exchange order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// PnL settled once at close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RealizedPnl {
    pub price_component: Decimal,
    pub funding_component: Decimal,
    pub total: Decimal,
}

impl RealizedPnl {
    /// Price move in the direction of the position plus the funding captured at entry.
    pub fn compute(
        side: OrderSide,
        entry_price: Decimal,
        exit_price: Decimal,
        size: Decimal,
        funding_component: Decimal,
    ) -> Self {
        let price_component = match side {
            OrderSide::Buy => (exit_price - entry_price) * size,
            OrderSide::Sell => (entry_price - exit_price) * size,
        };
        Self {
            price_component,
            funding_component,
            total: price_component + funding_component,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionState {
    Open,
    Closed {
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        realized: RealizedPnl,
    },
}

/// Entry details supplied by the entry scheduler.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    /// Payout the entry targeted
    pub funding_time: DateTime<Utc>,
    pub funding_rate: Decimal,
}

/// One funding capture trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: PositionId,
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub funding_time: DateTime<Utc>,
    pub funding_rate_at_entry: Decimal,
    /// |rate| x entry price x size, fixed at entry
    pub expected_funding_profit: Decimal,
    pub state: PositionState,
}

impl Position {
    pub(crate) fn open(id: PositionId, new: NewPosition) -> Self {
        let expected_funding_profit = new.funding_rate.abs() * new.entry_price * new.size;
        Self {
            id,
            order_id: new.order_id,
            symbol: new.symbol,
            side: new.side,
            size: new.size,
            entry_price: new.entry_price,
            entry_time: new.entry_time,
            funding_time: new.funding_time,
            funding_rate_at_entry: new.funding_rate,
            expected_funding_profit,
            state: PositionState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PositionState::Open)
    }

    /// Realized PnL, once closed.
    pub fn realized(&self) -> Option<&RealizedPnl> {
        match &self.state {
            PositionState::Open => None,
            PositionState::Closed { realized, .. } => Some(realized),
        }
    }

    pub fn exit_price(&self) -> Option<Decimal> {
        match &self.state {
            PositionState::Open => None,
            PositionState::Closed { exit_price, .. } => Some(*exit_price),
        }
    }

    pub fn exit_time(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            PositionState::Open => None,
            PositionState::Closed { exit_time, .. } => Some(*exit_time),
        }
    }

    /// Open -> Closed. Returns false if the position was already closed.
    pub(crate) fn close(&mut self, exit_price: Decimal, exit_time: DateTime<Utc>) -> bool {
        if !self.is_open() {
            return false;
        }
        let realized = RealizedPnl::compute(
            self.side,
            self.entry_price,
            exit_price,
            self.size,
            self.expected_funding_profit,
        );
        self.state = PositionState::Closed {
            exit_price,
            exit_time,
            realized,
        };
        true
    }
}
