//! Position ledger: open positions, closed history and trade statistics.
//!
//! The ledger is owned by the monitor loop and mutated only through
//! [`PositionLedger::open_position`] and [`PositionLedger::close_position`].
//! Statistics move exactly once per position, inside the close transition.

mod position;

pub use position::{NewPosition, Position, PositionId, PositionState, RealizedPnl};

use crate::error::{SniperError, SniperResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};

/// Closed positions kept in memory.
const MAX_CLOSED_HISTORY: usize = 1000;

/// Aggregate trade statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_trades: u64,
    pub successful_trades: u64,
    pub total_pnl: Decimal,
}

impl Statistics {
    /// Percentage of closed trades with positive PnL.
    pub fn success_rate(&self) -> Decimal {
        Decimal::from(self.successful_trades) * Decimal::ONE_HUNDRED
            / Decimal::from(self.total_trades.max(1))
    }

    fn record(&mut self, pnl: Decimal) {
        self.total_trades += 1;
        if pnl > Decimal::ZERO {
            self.successful_trades += 1;
        }
        self.total_pnl += pnl;
    }
}

#[derive(Debug, Default)]
pub struct PositionLedger {
    open: BTreeMap<PositionId, Position>,
    closed: VecDeque<Position>,
    stats: Statistics,
    next_id: u64,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a filled entry. Refuses a second open position for the symbol.
    pub fn open_position(&mut self, new: NewPosition) -> SniperResult<&Position> {
        if self.has_open(&new.symbol) {
            return Err(SniperError::DuplicatePosition { symbol: new.symbol });
        }

        self.next_id += 1;
        let id = PositionId(self.next_id);
        let position = Position::open(id, new);

        debug!(
            %id,
            symbol = %position.symbol,
            side = ?position.side,
            size = %position.size,
            "Position recorded"
        );

        Ok(self.open.entry(id).or_insert(position))
    }

    pub fn has_open(&self, symbol: &str) -> bool {
        self.open.values().any(|p| p.symbol == symbol)
    }

    /// Close an open position and settle its PnL.
    ///
    /// Returns the closed position, or `None` if `id` is not open.
    pub fn close_position(
        &mut self,
        id: PositionId,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
    ) -> Option<Position> {
        let mut position = self.open.remove(&id)?;
        if !position.close(exit_price, exit_time) {
            return None;
        }

        if let Some(realized) = position.realized() {
            self.stats.record(realized.total);
            info!(
                %id,
                symbol = %position.symbol,
                price_pnl = %realized.price_component,
                funding_pnl = %realized.funding_component,
                total_pnl = %realized.total,
                "Position settled"
            );
        }

        if self.closed.len() == MAX_CLOSED_HISTORY {
            self.closed.pop_front();
        }
        self.closed.push_back(position.clone());
        Some(position)
    }

    pub fn get(&self, id: PositionId) -> Option<&Position> {
        self.open.get(&id)
    }

    /// Open positions in id order.
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    pub fn open_ids(&self) -> Vec<PositionId> {
        self.open.keys().copied().collect()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Most recent closed positions, oldest first.
    pub fn closed_positions(&self) -> impl Iterator<Item = &Position> {
        self.closed.iter()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }
}
