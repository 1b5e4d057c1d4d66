//! Closes positions once the funding payout has settled.

use super::TradeObserver;
use crate::config::StrategyConfig;
use crate::error::{SniperError, SniperResult};
use crate::exchange::{RateSource, ScheduleSnapshot};
use crate::ledger::{Position, PositionId, PositionLedger};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

/// Outcome of one exit pass.
#[derive(Debug, Default)]
pub struct ExitReport {
    pub closed: Vec<PositionId>,
    pub failed: Vec<(PositionId, SniperError)>,
    /// Open positions still inside their holding period
    pub waiting: usize,
}

/// Outcome of an emergency close.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyReport {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct ExitScheduler {
    hold_after_funding: Duration,
}

impl ExitScheduler {
    pub fn new(hold_after_funding: Duration) -> Self {
        Self { hold_after_funding }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(config.hold_after_funding())
    }

    /// Payout time a position is measured against.
    ///
    /// The recorded target payout, unless the latest schedule reports an
    /// earlier one. A schedule that has rolled forward to the next interval
    /// never postpones the exit.
    pub fn payout_reference(position: &Position, snapshot: &ScheduleSnapshot) -> DateTime<Utc> {
        match snapshot.get(&position.symbol) {
            Some(quote) if quote.next_funding_time < position.funding_time => {
                quote.next_funding_time
            }
            _ => position.funding_time,
        }
    }

    /// Strictly past the holding period.
    pub fn is_due(&self, now: DateTime<Utc>, payout: DateTime<Utc>) -> bool {
        now - payout > self.hold_after_funding
    }

    /// Close every open position whose holding period has elapsed.
    ///
    /// Failed closes leave the position open for the next pass.
    pub async fn run(
        &self,
        now: DateTime<Utc>,
        snapshot: &ScheduleSnapshot,
        ledger: &mut PositionLedger,
        source: &dyn RateSource,
        observer: &dyn TradeObserver,
    ) -> ExitReport {
        let mut report = ExitReport::default();

        for id in ledger.open_ids() {
            let Some(position) = ledger.get(id) else {
                continue;
            };

            let payout = Self::payout_reference(position, snapshot);
            if !self.is_due(now, payout) {
                debug!(
                    %id,
                    symbol = %position.symbol,
                    seconds_since_payout = (now - payout).num_seconds(),
                    "Holding position"
                );
                report.waiting += 1;
                continue;
            }

            info!(
                %id,
                symbol = %position.symbol,
                seconds_since_payout = (now - payout).num_seconds(),
                "🔚 [EXIT] Holding period elapsed"
            );

            match self.close_position(id, now, ledger, source, observer).await {
                Ok(_) => report.closed.push(id),
                Err(e) => {
                    warn!(%id, error = %e, "❌ [EXIT] Close failed, will retry next cycle");
                    report.failed.push((id, e));
                }
            }
        }

        report
    }

    /// Flatten one open position with a reduce-only order and settle it.
    pub async fn close_position(
        &self,
        id: PositionId,
        now: DateTime<Utc>,
        ledger: &mut PositionLedger,
        source: &dyn RateSource,
        observer: &dyn TradeObserver,
    ) -> SniperResult<Position> {
        let position = ledger
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("position {id} is not open"))?;

        let exit_price = source
            .get_quote(&position.symbol)
            .await
            .map_err(|e| SniperError::from_call("get_quote", e))?;

        source
            .submit_order(&position.symbol, position.side.opposite(), position.size, true)
            .await
            .map_err(|e| SniperError::from_call("submit_order", e))?;

        let closed = ledger
            .close_position(id, exit_price, now)
            .ok_or_else(|| anyhow::anyhow!("position {id} closed concurrently"))?;

        if let Some(realized) = closed.realized() {
            info!(
                %id,
                symbol = %closed.symbol,
                entry_price = %closed.entry_price,
                %exit_price,
                price_pnl = %realized.price_component,
                funding_pnl = %realized.funding_component,
                total_pnl = %realized.total,
                "✅ [EXIT] Position closed"
            );
        }

        observer.position_closed(&closed, ledger).await;
        Ok(closed)
    }

    /// Best-effort close of every open position.
    pub async fn emergency_close_all(
        &self,
        now: DateTime<Utc>,
        ledger: &mut PositionLedger,
        source: &dyn RateSource,
        observer: &dyn TradeObserver,
    ) -> EmergencyReport {
        let mut report = EmergencyReport::default();
        let ids = ledger.open_ids();
        if ids.is_empty() {
            return report;
        }

        warn!(count = ids.len(), "🚨 [EMERGENCY] Closing all open positions");

        for id in ids {
            match self.close_position(id, now, ledger, source, observer).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    error!(%id, error = %e, "🚨 [EMERGENCY] Failed to close position");
                    report.failed += 1;
                }
            }
        }

        warn!(
            succeeded = report.succeeded,
            failed = report.failed,
            "🚨 [EMERGENCY] Close-all finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{FundingQuote, OrderSide};
    use crate::ledger::NewPosition;
    use rust_decimal_macros::dec;

    fn open(ledger: &mut PositionLedger, symbol: &str, funding_time: DateTime<Utc>) -> PositionId {
        ledger
            .open_position(NewPosition {
                order_id: "1".into(),
                symbol: symbol.into(),
                side: OrderSide::Sell,
                size: dec!(1),
                entry_price: dec!(100),
                entry_time: funding_time - Duration::seconds(5),
                funding_time,
                funding_rate: dec!(0.001),
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_due_is_strict() {
        let exit = ExitScheduler::new(Duration::seconds(30));
        let payout = Utc::now();
        assert!(!exit.is_due(payout + Duration::seconds(30), payout));
        assert!(exit.is_due(payout + Duration::milliseconds(30_001), payout));
        assert!(!exit.is_due(payout, payout));
    }

    #[test]
    fn test_rolled_schedule_does_not_postpone_exit() {
        let payout = Utc::now();
        let mut ledger = PositionLedger::new();
        let id = open(&mut ledger, "BTCUSDT", payout);
        let position = ledger.get(id).unwrap();

        let rolled = ScheduleSnapshot::new(
            vec![FundingQuote::new(
                "BTCUSDT",
                dec!(0.0002),
                payout + Duration::hours(8),
                dec!(100),
            )],
            payout,
        );
        assert_eq!(ExitScheduler::payout_reference(position, &rolled), payout);
    }

    #[test]
    fn test_earlier_schedule_time_wins() {
        let payout = Utc::now();
        let mut ledger = PositionLedger::new();
        let id = open(&mut ledger, "BTCUSDT", payout);
        let position = ledger.get(id).unwrap();

        let earlier = payout - Duration::seconds(60);
        let snapshot = ScheduleSnapshot::new(
            vec![FundingQuote::new("BTCUSDT", dec!(0.0002), earlier, dec!(100))],
            payout,
        );
        assert_eq!(ExitScheduler::payout_reference(position, &snapshot), earlier);
    }

    #[test]
    fn test_absent_symbol_uses_recorded_time() {
        let payout = Utc::now();
        let mut ledger = PositionLedger::new();
        let id = open(&mut ledger, "ETHUSDT", payout);
        let position = ledger.get(id).unwrap();

        let snapshot = ScheduleSnapshot::empty(payout);
        assert_eq!(ExitScheduler::payout_reference(position, &snapshot), payout);
    }
}
