//! The monitor loop: poll the funding schedule, enter and exit around each
//! payout, publish the result, sleep, repeat.
//!
//! One sequential loop owns the ledger. Cycles never overlap and every
//! exchange call is awaited before the next one is issued.

mod reporter;
mod signal;

pub use reporter::Reporter;
pub use signal::cancel_on_shutdown_signals;

use crate::config::{MonitorConfig, StrategyConfig};
use crate::exchange::{RateSource, ScheduleSnapshot};
use crate::ledger::PositionLedger;
use crate::notify::NotificationEvent;
use crate::strategy::{EmergencyReport, EntryScheduler, ExitScheduler, RankingPolicy};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Which sleep follows a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepKind {
    /// Normal cadence after a completed cycle
    Fast,
    /// Longer wait after the schedule could not be fetched
    Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Polling,
    Evaluating,
    Publishing,
    Sleeping(SleepKind),
    Stopped,
}

/// Result of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed {
        candidates: usize,
        opened: usize,
        closed: usize,
        failed: usize,
    },
    /// The schedule refresh failed; nothing was evaluated or published
    PollFailed,
    /// Cancellation arrived between sub-steps
    Cancelled,
}

impl CycleOutcome {
    pub fn sleep_kind(&self) -> SleepKind {
        match self {
            CycleOutcome::PollFailed => SleepKind::Backoff,
            _ => SleepKind::Fast,
        }
    }
}

pub struct MonitorLoop {
    source: Arc<dyn RateSource>,
    policy: RankingPolicy,
    entry: EntryScheduler,
    exit: ExitScheduler,
    ledger: PositionLedger,
    reporter: Reporter,
    config: MonitorConfig,
    quote_asset: String,
    state: MonitorState,
    cycles: u64,
    symbols_loaded_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
}

impl MonitorLoop {
    pub fn new(
        source: Arc<dyn RateSource>,
        strategy: &StrategyConfig,
        config: MonitorConfig,
        reporter: Reporter,
    ) -> Self {
        Self {
            source,
            policy: RankingPolicy::from_config(strategy),
            entry: EntryScheduler::from_config(strategy),
            exit: ExitScheduler::from_config(strategy),
            ledger: PositionLedger::new(),
            reporter,
            config,
            quote_asset: strategy.quote_asset.clone(),
            state: MonitorState::Idle,
            cycles: 0,
            symbols_loaded_at: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the loop. Clone it before calling [`MonitorLoop::run`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn transition(&mut self, next: MonitorState) {
        debug!(from = ?self.state, to = ?next, "Monitor state change");
        self.state = next;
    }

    /// Balance, symbol metadata, startup notification, initial status.
    /// Failures are logged and never abort startup.
    pub async fn startup(&mut self, mode: &str) {
        self.refresh_balance().await;
        let balance = self.reporter.balance().await;
        info!("💰 [INIT] Balance: {} {}", balance, self.quote_asset);

        self.refresh_symbols(Utc::now()).await;

        let strategy = self.reporter.strategy();
        let event = NotificationEvent::Startup {
            mode: mode.to_string(),
            balance,
            min_abs_rate: strategy.min_abs_rate,
            trade_notional: strategy.trade_notional,
            entry_window_secs: strategy.entry_window_secs,
            hold_after_funding_secs: strategy.hold_after_funding_secs,
        };
        self.reporter.notify(event).await;
        self.reporter.publish_status(true, &self.ledger).await;
    }

    async fn refresh_balance(&self) {
        match self.source.get_balance(&self.quote_asset).await {
            Ok(balance) => self.reporter.set_balance(balance).await,
            Err(e) => warn!(error = %e, "⚠️  Balance refresh failed, keeping previous value"),
        }
    }

    /// Reload symbol metadata. A failure leaves it marked stale so the next
    /// cycle tries again.
    async fn refresh_symbols(&mut self, now: DateTime<Utc>) {
        match self.source.load_symbols().await {
            Ok(count) => {
                self.symbols_loaded_at = Some(now);
                info!(count, "✅ [INIT] Symbol metadata loaded");
            }
            Err(e) => warn!(error = %e, "⚠️  [INIT] Failed to load symbol metadata"),
        }
    }

    fn symbols_stale(&self, now: DateTime<Utc>) -> bool {
        match self.symbols_loaded_at {
            Some(at) => now - at >= self.config.metadata_refresh(),
            None => true,
        }
    }

    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.run_cycle_at(Utc::now()).await
    }

    /// One poll, evaluate, publish pass evaluated at `now`.
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        self.cycles += 1;

        self.transition(MonitorState::Polling);
        let snapshot: ScheduleSnapshot = match self.source.get_funding_schedule().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, cycle = self.cycles, "❌ [SCAN] Failed to fetch funding schedule");
                return CycleOutcome::PollFailed;
            }
        };
        if self.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        self.transition(MonitorState::Evaluating);
        if self.symbols_stale(now) {
            self.refresh_symbols(now).await;
        }
        let ranked = self.policy.rank(&snapshot);
        info!(
            cycle = self.cycles,
            total = ranked.total_pairs,
            eligible = ranked.filtered_pairs,
            candidates = ranked.candidates.len(),
            open = self.ledger.open_count(),
            "📡 [SCAN] Funding schedule refreshed"
        );
        if let Some(top) = ranked.candidates.first() {
            debug!(
                symbol = %top.symbol(),
                rate = %top.quote.predicted_rate,
                seconds_until = top.time_until(now).num_seconds(),
                "Top candidate"
            );
        }

        let entries = self
            .entry
            .run(
                now,
                &ranked.candidates,
                &mut self.ledger,
                self.source.as_ref(),
                &self.reporter,
            )
            .await;
        if self.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        let exits = self
            .exit
            .run(
                now,
                &snapshot,
                &mut self.ledger,
                self.source.as_ref(),
                &self.reporter,
            )
            .await;

        self.refresh_balance().await;

        self.transition(MonitorState::Publishing);
        self.reporter.publish_schedule(&ranked, now);
        self.reporter.publish_status(true, &self.ledger).await;

        CycleOutcome::Completed {
            candidates: ranked.candidates.len(),
            opened: entries.opened.len(),
            closed: exits.closed.len(),
            failed: entries.failed.len() + exits.failed.len(),
        }
    }

    fn sleep_duration(&self, kind: SleepKind) -> Duration {
        match kind {
            SleepKind::Fast => self.config.poll_interval(),
            SleepKind::Backoff => self.config.error_backoff(),
        }
    }

    /// Run until the cancellation token fires, then shut down.
    pub async fn run(&mut self, mode: &str) -> EmergencyReport {
        self.startup(mode).await;

        info!("🚀 Starting main trading loop...");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        while !self.cancel.is_cancelled() {
            let outcome = self.run_cycle().await;
            if let CycleOutcome::Completed {
                opened,
                closed,
                failed,
                ..
            } = outcome
            {
                if opened + closed + failed > 0 {
                    info!(opened, closed, failed, "📊 Cycle complete");
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let kind = outcome.sleep_kind();
            let delay = self.sleep_duration(kind);
            self.transition(MonitorState::Sleeping(kind));
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.shutdown().await
    }

    /// Close everything, report, and mark the bot stopped.
    pub async fn shutdown(&mut self) -> EmergencyReport {
        self.transition(MonitorState::Stopped);
        info!(
            open = self.ledger.open_count(),
            "🛑 [SHUTDOWN] Stop requested, closing open positions"
        );

        let report = self
            .exit
            .emergency_close_all(
                Utc::now(),
                &mut self.ledger,
                self.source.as_ref(),
                &self.reporter,
            )
            .await;

        self.reporter
            .notify(NotificationEvent::EmergencyStop {
                succeeded: report.succeeded,
                failed: report.failed,
            })
            .await;

        self.refresh_balance().await;
        self.reporter.publish_status(false, &self.ledger).await;
        self.reporter
            .notify(NotificationEvent::Shutdown {
                statistics: *self.ledger.statistics(),
            })
            .await;

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "🛑 [SHUTDOWN] Monitor stopped"
        );
        report
    }
}
