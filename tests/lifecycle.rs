//! Entry, exit and emergency close against the mock exchange.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use funding_fee_sniper::config::StrategyConfig;
use funding_fee_sniper::exchange::{
    FundingQuote, InstrumentRules, MockExchange, OrderSide, RateSource,
};
use funding_fee_sniper::ledger::{Position, PositionLedger};
use funding_fee_sniper::SniperError;
use funding_fee_sniper::strategy::{
    EntryScheduler, ExitScheduler, RankingPolicy, SkipReason, TradeObserver,
};
use rust_decimal_macros::dec;
use std::sync::Mutex;

/// Records every transition it is told about.
#[derive(Default)]
struct RecordingObserver {
    opened: Mutex<Vec<String>>,
    closed: Mutex<Vec<String>>,
}

impl RecordingObserver {
    fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TradeObserver for RecordingObserver {
    async fn position_opened(&self, position: &Position, ledger: &PositionLedger) {
        assert!(ledger.has_open(&position.symbol));
        self.opened.lock().unwrap().push(position.symbol.clone());
    }

    async fn position_closed(&self, position: &Position, ledger: &PositionLedger) {
        assert!(!ledger.has_open(&position.symbol));
        self.closed.lock().unwrap().push(position.symbol.clone());
    }
}

/// Takes a while to acknowledge each open, like a slow notification sink.
struct SlowObserver {
    delay: std::time::Duration,
}

#[async_trait]
impl TradeObserver for SlowObserver {
    async fn position_opened(&self, _position: &Position, _ledger: &PositionLedger) {
        tokio::time::sleep(self.delay).await;
    }

    async fn position_closed(&self, _position: &Position, _ledger: &PositionLedger) {}
}

async fn abc_exchange(now: DateTime<Utc>) -> MockExchange {
    let exchange = MockExchange::new(dec!(1000));
    exchange
        .set_schedule(vec![
            FundingQuote::new("AUSDT", dec!(0.0008), now + Duration::seconds(8), dec!(100)),
            FundingQuote::new("BUSDT", dec!(-0.0012), now + Duration::seconds(9), dec!(50)),
            FundingQuote::new("CUSDT", dec!(0.00005), now + Duration::seconds(5), dec!(20)),
        ])
        .await;
    exchange
}

fn strategy() -> StrategyConfig {
    StrategyConfig::default()
}

// =============================================================================
// Entry
// =============================================================================

#[tokio::test]
async fn test_enters_receiving_side_of_each_candidate() {
    let now = Utc::now();
    let exchange = abc_exchange(now).await;
    let observer = RecordingObserver::default();
    let mut ledger = PositionLedger::new();

    let snapshot = exchange.get_funding_schedule().await.unwrap();
    let ranked = RankingPolicy::from_config(&strategy()).rank(&snapshot);
    let symbols: Vec<_> = ranked.candidates.iter().map(|c| c.symbol()).collect();
    assert_eq!(symbols, vec!["BUSDT", "AUSDT"]);

    let report = EntryScheduler::from_config(&strategy())
        .run(now, &ranked.candidates, &mut ledger, &exchange, &observer)
        .await;

    assert_eq!(report.opened.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(observer.opened(), vec!["BUSDT", "AUSDT"]);

    // 10 USDT notional: 0.1 A at 100 short, 0.2 B at 50 long
    assert_eq!(exchange.net_position("AUSDT").await, dec!(-0.1));
    assert_eq!(exchange.net_position("BUSDT").await, dec!(0.2));
    assert_eq!(exchange.net_position("CUSDT").await, dec!(0));

    let a = ledger.open_positions().find(|p| p.symbol == "AUSDT").unwrap();
    assert_eq!(a.side, OrderSide::Sell);
    assert_eq!(a.funding_time, now + Duration::seconds(8));
    // 0.0008 * 100 * 0.1
    assert_eq!(a.expected_funding_profit, dec!(0.008));

    let b = ledger.open_positions().find(|p| p.symbol == "BUSDT").unwrap();
    assert_eq!(b.side, OrderSide::Buy);
}

#[tokio::test]
async fn test_entry_window_boundaries() {
    let now = Utc::now();
    let exchange = MockExchange::new(dec!(1000));
    exchange
        .set_schedule(vec![
            FundingQuote::new("ATUSDT", dec!(0.001), now + Duration::seconds(10), dec!(10)),
            FundingQuote::new("PASTUSDT", dec!(0.001), now, dec!(10)),
            FundingQuote::new("LATEUSDT", dec!(0.001), now - Duration::seconds(1), dec!(10)),
            FundingQuote::new("EARLYUSDT", dec!(0.001), now + Duration::seconds(11), dec!(10)),
        ])
        .await;
    let mut ledger = PositionLedger::new();

    let snapshot = exchange.get_funding_schedule().await.unwrap();
    let ranked = RankingPolicy::from_config(&strategy()).rank(&snapshot);
    assert_eq!(ranked.candidates.len(), 4);

    let report = EntryScheduler::from_config(&strategy())
        .run(
            now,
            &ranked.candidates,
            &mut ledger,
            &exchange,
            &RecordingObserver::default(),
        )
        .await;

    assert_eq!(report.opened.len(), 1);
    assert!(ledger.has_open("ATUSDT"));
    assert_eq!(ledger.open_count(), 1);
}

#[tokio::test]
async fn test_single_open_position_per_symbol() {
    let now = Utc::now();
    let exchange = abc_exchange(now).await;
    let observer = RecordingObserver::default();
    let mut ledger = PositionLedger::new();
    let entry = EntryScheduler::from_config(&strategy());

    let snapshot = exchange.get_funding_schedule().await.unwrap();
    let ranked = RankingPolicy::from_config(&strategy()).rank(&snapshot);

    entry
        .run(now, &ranked.candidates, &mut ledger, &exchange, &observer)
        .await;
    let second = entry
        .run(
            now + Duration::seconds(1),
            &ranked.candidates,
            &mut ledger,
            &exchange,
            &observer,
        )
        .await;

    assert!(second.opened.is_empty());
    assert_eq!(
        second.skipped,
        vec![
            ("BUSDT".to_string(), SkipReason::AlreadyOpen),
            ("AUSDT".to_string(), SkipReason::AlreadyOpen),
        ]
    );
    assert_eq!(ledger.open_count(), 2);
    assert_eq!(exchange.get_state().await.order_count, 2);
}

#[tokio::test]
async fn test_size_below_minimum_is_skipped() {
    let now = Utc::now();
    let exchange = abc_exchange(now).await;
    exchange
        .set_instrument(
            "AUSDT",
            InstrumentRules {
                qty_step: dec!(1),
                min_order_qty: dec!(1),
            },
        )
        .await;
    let mut ledger = PositionLedger::new();

    let snapshot = exchange.get_funding_schedule().await.unwrap();
    let ranked = RankingPolicy::from_config(&strategy()).rank(&snapshot);
    let report = EntryScheduler::from_config(&strategy())
        .run(
            now,
            &ranked.candidates,
            &mut ledger,
            &exchange,
            &RecordingObserver::default(),
        )
        .await;

    assert_eq!(report.opened.len(), 1);
    assert_eq!(
        report.skipped,
        vec![("AUSDT".to_string(), SkipReason::BelowMinimum)]
    );
    assert!(!ledger.has_open("AUSDT"));
}

#[tokio::test]
async fn test_failed_order_does_not_stop_other_candidates() {
    let now = Utc::now();
    let exchange = abc_exchange(now).await;
    exchange.fail_orders("BUSDT").await;
    let mut ledger = PositionLedger::new();

    let snapshot = exchange.get_funding_schedule().await.unwrap();
    let ranked = RankingPolicy::from_config(&strategy()).rank(&snapshot);
    let report = EntryScheduler::from_config(&strategy())
        .run(
            now,
            &ranked.candidates,
            &mut ledger,
            &exchange,
            &RecordingObserver::default(),
        )
        .await;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "BUSDT");
    assert!(matches!(
        report.failed[0].1,
        SniperError::OrderRejected { .. }
    ));
    assert!(ledger.has_open("AUSDT"));
    assert!(!ledger.has_open("BUSDT"));
}

#[tokio::test]
async fn test_payout_passing_mid_pass_skips_later_candidates() {
    let now = Utc::now();
    let payout = now + Duration::milliseconds(400);
    let exchange = MockExchange::new(dec!(1000));
    exchange
        .set_schedule(vec![
            FundingQuote::new("AUSDT", dec!(0.002), payout, dec!(100)),
            FundingQuote::new("BUSDT", dec!(0.001), payout, dec!(50)),
        ])
        .await;
    let mut ledger = PositionLedger::new();

    let snapshot = exchange.get_funding_schedule().await.unwrap();
    let ranked = RankingPolicy::from_config(&strategy()).rank(&snapshot);
    let observer = SlowObserver {
        delay: std::time::Duration::from_millis(600),
    };
    let report = EntryScheduler::from_config(&strategy())
        .run(now, &ranked.candidates, &mut ledger, &exchange, &observer)
        .await;

    assert_eq!(report.opened.len(), 1);
    assert_eq!(
        report.skipped,
        vec![("BUSDT".to_string(), SkipReason::WindowClosed)]
    );
    assert!(!ledger.has_open("BUSDT"));
    assert_eq!(exchange.net_position("BUSDT").await, dec!(0));
    assert_eq!(exchange.get_state().await.order_count, 1);

    let a = ledger.open_positions().next().unwrap();
    assert_eq!(a.symbol, "AUSDT");
    assert!(a.entry_time >= now);
    assert!(a.entry_time < payout);
}

// =============================================================================
// Exit
// =============================================================================

#[tokio::test]
async fn test_exit_waits_strictly_past_hold_period() {
    let now = Utc::now();
    let exchange = abc_exchange(now).await;
    let observer = RecordingObserver::default();
    let mut ledger = PositionLedger::new();
    let config = strategy();

    let snapshot = exchange.get_funding_schedule().await.unwrap();
    let ranked = RankingPolicy::from_config(&config).rank(&snapshot);
    EntryScheduler::from_config(&config)
        .run(now, &ranked.candidates, &mut ledger, &exchange, &observer)
        .await;

    let exit = ExitScheduler::from_config(&config);
    let a_payout = now + Duration::seconds(8);

    // Exactly 30s after A's payout: nothing is due yet
    let report = exit
        .run(
            a_payout + Duration::seconds(30),
            &snapshot,
            &mut ledger,
            &exchange,
            &observer,
        )
        .await;
    assert!(report.closed.is_empty());
    assert_eq!(report.waiting, 2);

    // Price moved in favour of the short
    exchange.set_price("AUSDT", dec!(99)).await;
    let report = exit
        .run(
            a_payout + Duration::milliseconds(30_001),
            &snapshot,
            &mut ledger,
            &exchange,
            &observer,
        )
        .await;
    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.waiting, 1);
    assert_eq!(observer.closed(), vec!["AUSDT"]);
    assert_eq!(exchange.net_position("AUSDT").await, dec!(0));

    let closed = ledger.closed_positions().next().unwrap();
    let realized = closed.realized().unwrap();
    // (100 - 99) * 0.1 + 0.0008 * 100 * 0.1
    assert_eq!(realized.price_component, dec!(0.1));
    assert_eq!(realized.funding_component, dec!(0.008));
    assert_eq!(realized.total, dec!(0.108));

    let stats = ledger.statistics();
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.successful_trades, 1);
}

#[tokio::test]
async fn test_failed_close_is_retried_next_pass() {
    let now = Utc::now();
    let exchange = abc_exchange(now).await;
    let observer = RecordingObserver::default();
    let mut ledger = PositionLedger::new();
    let config = strategy();

    let snapshot = exchange.get_funding_schedule().await.unwrap();
    let ranked = RankingPolicy::from_config(&config).rank(&snapshot);
    EntryScheduler::from_config(&config)
        .run(now, &ranked.candidates, &mut ledger, &exchange, &observer)
        .await;

    let exit = ExitScheduler::from_config(&config);
    let later = now + Duration::minutes(5);

    exchange.fail_next_orders(1).await;
    let report = exit
        .run(later, &snapshot, &mut ledger, &exchange, &observer)
        .await;
    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(ledger.open_count(), 1);

    let report = exit
        .run(later, &snapshot, &mut ledger, &exchange, &observer)
        .await;
    assert_eq!(report.closed.len(), 1);
    assert_eq!(ledger.open_count(), 0);
    assert_eq!(ledger.statistics().total_trades, 2);
}

// =============================================================================
// Emergency close
// =============================================================================

#[tokio::test]
async fn test_emergency_close_with_one_failure() {
    let now = Utc::now();
    let exchange = MockExchange::new(dec!(1000));
    exchange
        .set_schedule(vec![
            FundingQuote::new("XUSDT", dec!(0.001), now + Duration::seconds(3), dec!(10)),
            FundingQuote::new("YUSDT", dec!(-0.002), now + Duration::seconds(4), dec!(20)),
            FundingQuote::new("ZUSDT", dec!(0.003), now + Duration::seconds(5), dec!(40)),
        ])
        .await;
    let observer = RecordingObserver::default();
    let mut ledger = PositionLedger::new();
    let config = strategy();

    let snapshot = exchange.get_funding_schedule().await.unwrap();
    let ranked = RankingPolicy::from_config(&config).rank(&snapshot);
    let entries = EntryScheduler::from_config(&config)
        .run(now, &ranked.candidates, &mut ledger, &exchange, &observer)
        .await;
    assert_eq!(entries.opened.len(), 3);

    exchange.fail_orders("YUSDT").await;
    let report = ExitScheduler::from_config(&config)
        .emergency_close_all(now, &mut ledger, &exchange, &observer)
        .await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(ledger.open_count(), 1);
    assert!(ledger.has_open("YUSDT"));
    assert_eq!(ledger.closed_positions().count(), 2);
    assert_eq!(ledger.statistics().total_trades, 2);
    assert_eq!(observer.closed().len(), 2);
}

#[tokio::test]
async fn test_emergency_close_with_nothing_open() {
    let exchange = MockExchange::new(dec!(1000));
    let mut ledger = PositionLedger::new();

    let report = ExitScheduler::from_config(&strategy())
        .emergency_close_all(
            Utc::now(),
            &mut ledger,
            &exchange,
            &RecordingObserver::default(),
        )
        .await;

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(exchange.get_state().await.order_count, 0);
}
