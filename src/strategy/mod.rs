//! Trading strategy implementation.
//!
//! Contains the core logic for:
//! - Ranking the funding schedule into candidates
//! - Entering positions just before a funding payout
//! - Exiting positions once the payout has settled

mod entry;
mod exit;
mod ranking;

pub use entry::{EntryReport, EntryScheduler, SkipReason};
pub use exit::{EmergencyReport, ExitReport, ExitScheduler};
pub use ranking::{Candidate, FundingDirection, RankedSchedule, RankingPolicy, SelectionMode};

use crate::ledger::{Position, PositionLedger};
use async_trait::async_trait;

/// Side effects of a position transition (notification, journaling, status).
///
/// Called after the ledger has been updated, with read access to it.
#[async_trait]
pub trait TradeObserver: Send + Sync {
    async fn position_opened(&self, position: &Position, ledger: &PositionLedger);

    async fn position_closed(&self, position: &Position, ledger: &PositionLedger);
}
