//! Side effects of position transitions and cycle results.

use crate::config::StrategyConfig;
use crate::ledger::{Position, PositionLedger};
use crate::notify::{NotificationEvent, Notifier};
use crate::persistence::{ScheduleReport, StatusPublisher, StatusReport, TradeJournal};
use crate::strategy::{RankedSchedule, TradeObserver};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Fans ledger transitions out to notifications, the journal and the status file.
///
/// Every sink is best effort. A failed write or message is logged and trading
/// carries on.
pub struct Reporter {
    notifier: Arc<dyn Notifier>,
    publisher: Arc<dyn StatusPublisher>,
    journal: Option<TradeJournal>,
    strategy: StrategyConfig,
    start_time: DateTime<Utc>,
    balance: RwLock<Decimal>,
}

impl Reporter {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        publisher: Arc<dyn StatusPublisher>,
        strategy: StrategyConfig,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            notifier,
            publisher,
            journal: None,
            strategy,
            start_time,
            balance: RwLock::new(Decimal::ZERO),
        }
    }

    /// Journal every closed position.
    pub fn with_journal(mut self, journal: TradeJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn strategy(&self) -> &StrategyConfig {
        &self.strategy
    }

    pub async fn balance(&self) -> Decimal {
        *self.balance.read().await
    }

    pub async fn set_balance(&self, balance: Decimal) {
        *self.balance.write().await = balance;
    }

    pub async fn notify(&self, event: NotificationEvent) {
        if let Err(e) = self.notifier.notify(&event).await {
            warn!(kind = event.kind(), error = %e, "⚠️ [NOTIFY] Failed to deliver notification");
        }
    }

    pub async fn publish_status(&self, running: bool, ledger: &PositionLedger) {
        let report = StatusReport::build(
            running,
            self.start_time,
            self.balance().await,
            ledger,
            &self.strategy,
            Utc::now(),
        );
        match self.publisher.publish_status(&report) {
            Ok(()) => debug!(running, active = report.active_trades.len(), "Status published"),
            Err(e) => error!(error = %e, "❌ [PUBLISH] Failed to write status"),
        }
    }

    pub fn publish_schedule(&self, ranked: &RankedSchedule, now: DateTime<Utc>) {
        let report = ScheduleReport::build(ranked, &self.strategy, now);
        match self.publisher.publish_schedule(&report) {
            Ok(()) => debug!(
                candidates = report.top_rates.len(),
                positive = report.positive_count(),
                "Schedule published"
            ),
            Err(e) => error!(error = %e, "❌ [PUBLISH] Failed to write schedule"),
        }
    }
}

#[async_trait]
impl TradeObserver for Reporter {
    async fn position_opened(&self, position: &Position, ledger: &PositionLedger) {
        self.notify(NotificationEvent::opened(position)).await;
        self.publish_status(true, ledger).await;
    }

    async fn position_closed(&self, position: &Position, ledger: &PositionLedger) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_closed(position) {
                error!(symbol = %position.symbol, error = %e, "❌ [JOURNAL] Failed to record trade");
            }
        }
        if let Some(event) = NotificationEvent::closed(position, ledger.statistics()) {
            self.notify(event).await;
        }
        self.publish_status(true, ledger).await;
    }
}
