//! Opens positions shortly before a funding payout.

use super::ranking::Candidate;
use super::TradeObserver;
use crate::config::StrategyConfig;
use crate::error::{SniperError, SniperResult};
use crate::exchange::RateSource;
use crate::ledger::{NewPosition, PositionId, PositionLedger};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why an in-window candidate was not entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The symbol already has an open position
    AlreadyOpen,
    /// The notional budget rounds below the instrument minimum
    BelowMinimum,
    /// The payout passed while earlier candidates were being processed
    WindowClosed,
}

/// Cycle time advanced by the wall-clock time spent in the pass.
struct PassClock {
    reference: DateTime<Utc>,
    started: Instant,
}

impl PassClock {
    fn start(reference: DateTime<Utc>) -> Self {
        Self {
            reference,
            started: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.started.elapsed()).unwrap_or(Duration::zero());
        self.reference + elapsed
    }
}

enum Attempt {
    Opened(PositionId),
    WindowClosed,
}

/// Outcome of one entry pass.
#[derive(Debug, Default)]
pub struct EntryReport {
    pub opened: Vec<PositionId>,
    pub skipped: Vec<(String, SkipReason)>,
    pub failed: Vec<(String, SniperError)>,
}

#[derive(Debug, Clone)]
pub struct EntryScheduler {
    trade_notional: Decimal,
    entry_window: Duration,
}

impl EntryScheduler {
    pub fn new(trade_notional: Decimal, entry_window: Duration) -> Self {
        Self {
            trade_notional,
            entry_window,
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(config.trade_notional, config.entry_window())
    }

    /// Whether a payout `until` away is inside the entry window.
    pub fn in_window(&self, until: Duration) -> bool {
        until > Duration::zero() && until <= self.entry_window
    }

    /// Enter every in-window candidate without an open position.
    ///
    /// Candidates are processed in rank order. Positions opened earlier in the
    /// pass count against later candidates for the same symbol. `now` is the
    /// cycle time; the window is checked again against the time elapsed since
    /// then right before each order goes out.
    pub async fn run(
        &self,
        now: DateTime<Utc>,
        candidates: &[Candidate],
        ledger: &mut PositionLedger,
        source: &dyn RateSource,
        observer: &dyn TradeObserver,
    ) -> EntryReport {
        let mut report = EntryReport::default();
        let clock = PassClock::start(now);

        for candidate in candidates {
            let symbol = candidate.symbol();
            let until = candidate.time_until(now);
            if !self.in_window(until) {
                continue;
            }

            if ledger.has_open(symbol) {
                debug!(%symbol, "Position already open, skipping entry");
                report
                    .skipped
                    .push((symbol.to_string(), SkipReason::AlreadyOpen));
                continue;
            }

            if !self.in_window(candidate.time_until(clock.now())) {
                warn!(%symbol, "⚠️ [ENTRY] Payout passed during this pass, skipping");
                report
                    .skipped
                    .push((symbol.to_string(), SkipReason::WindowClosed));
                continue;
            }

            info!(
                %symbol,
                rate = %candidate.quote.predicted_rate,
                side = ?candidate.side,
                seconds_until = until.num_seconds(),
                "🎯 [ENTRY] Funding payout inside entry window"
            );

            match self.open(&clock, candidate, ledger, source).await {
                Ok(Attempt::Opened(id)) => {
                    if let Some(position) = ledger.get(id) {
                        observer.position_opened(position, ledger).await;
                    }
                    report.opened.push(id);
                }
                Ok(Attempt::WindowClosed) => {
                    warn!(%symbol, "⚠️ [ENTRY] Payout passed before the order went out, skipping");
                    report
                        .skipped
                        .push((symbol.to_string(), SkipReason::WindowClosed));
                }
                Err(SniperError::Sizing { symbol, notional }) => {
                    warn!(%symbol, %notional, "⚠️ [ENTRY] Size below instrument minimum, skipping");
                    report.skipped.push((symbol, SkipReason::BelowMinimum));
                }
                Err(e) => {
                    warn!(%symbol, error = %e, "❌ [ENTRY] Failed to open position");
                    report.failed.push((symbol.to_string(), e));
                }
            }
        }

        report
    }

    async fn open(
        &self,
        clock: &PassClock,
        candidate: &Candidate,
        ledger: &mut PositionLedger,
        source: &dyn RateSource,
    ) -> SniperResult<Attempt> {
        let symbol = candidate.symbol();

        let size = source
            .resolve_order_size(symbol, self.trade_notional)
            .await
            .map_err(|e| SniperError::from_call("resolve_order_size", e))?;
        if size <= Decimal::ZERO {
            return Err(SniperError::Sizing {
                symbol: symbol.to_string(),
                notional: self.trade_notional,
            });
        }

        let entry_price = source
            .get_quote(symbol)
            .await
            .map_err(|e| SniperError::from_call("get_quote", e))?;

        let submitted_at = clock.now();
        if !self.in_window(candidate.time_until(submitted_at)) {
            return Ok(Attempt::WindowClosed);
        }

        let order_id = source
            .submit_order(symbol, candidate.side, size, false)
            .await
            .map_err(|e| SniperError::from_call("submit_order", e))?;

        let position = ledger.open_position(NewPosition {
            order_id,
            symbol: symbol.to_string(),
            side: candidate.side,
            size,
            entry_price,
            entry_time: submitted_at,
            funding_time: candidate.quote.next_funding_time,
            funding_rate: candidate.quote.predicted_rate,
        })?;

        info!(
            id = %position.id,
            %symbol,
            side = ?position.side,
            size = %position.size,
            entry_price = %position.entry_price,
            expected_funding = %position.expected_funding_profit,
            order_id = %position.order_id,
            "✅ [ENTRY] Position opened"
        );

        Ok(Attempt::Opened(position.id))
    }
}
