//! Status and schedule reports written for external consumers.

use crate::config::StrategyConfig;
use crate::exchange::OrderSide;
use crate::ledger::PositionLedger;
use crate::strategy::{RankedSchedule, SelectionMode};
use crate::utils::to_percent;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

fn num(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub running: bool,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTrade {
    pub id: u64,
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub size: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub funding_time: DateTime<Utc>,
    pub funding_rate: f64,
    pub expected_funding_profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub min_funding_rate: f64,
    pub trade_amount_usdt: f64,
    pub seconds_before_funding: u64,
    pub seconds_after_funding: u64,
    pub top_pairs_count: usize,
    pub selection_mode: SelectionMode,
}

impl ConfigSummary {
    fn from_config(config: &StrategyConfig) -> Self {
        Self {
            min_funding_rate: num(config.min_abs_rate),
            trade_amount_usdt: num(config.trade_notional),
            seconds_before_funding: config.entry_window_secs,
            seconds_after_funding: config.hold_after_funding_secs,
            top_pairs_count: config.top_n,
            selection_mode: config.selection_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub total_trades: u64,
    pub successful_trades: u64,
    pub success_rate: f64,
    pub total_pnl: f64,
}

/// Contents of the status file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub trading_bot: BotState,
    pub balance: f64,
    pub active_trades: Vec<ActiveTrade>,
    pub config: ConfigSummary,
    pub statistics: StatisticsReport,
    pub timestamp: DateTime<Utc>,
}

impl StatusReport {
    pub fn build(
        running: bool,
        start_time: DateTime<Utc>,
        balance: Decimal,
        ledger: &PositionLedger,
        config: &StrategyConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let active_trades = ledger
            .open_positions()
            .map(|p| ActiveTrade {
                id: p.id.0,
                order_id: p.order_id.clone(),
                symbol: p.symbol.clone(),
                side: p.side,
                size: num(p.size),
                entry_price: num(p.entry_price),
                entry_time: p.entry_time,
                funding_time: p.funding_time,
                funding_rate: num(p.funding_rate_at_entry),
                expected_funding_profit: num(p.expected_funding_profit),
            })
            .collect();

        let stats = ledger.statistics();
        Self {
            trading_bot: BotState {
                running,
                start_time,
            },
            balance: num(balance),
            active_trades,
            config: ConfigSummary::from_config(config),
            statistics: StatisticsReport {
                total_trades: stats.total_trades,
                successful_trades: stats.successful_trades,
                success_rate: num(stats.success_rate().round_dp(2)),
                total_pnl: num(stats.total_pnl),
            },
            timestamp: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateEntry {
    pub symbol: String,
    pub rate: f64,
    pub rate_percent: f64,
    pub abs_rate: f64,
    pub abs_rate_percent: f64,
    pub next_funding_time: DateTime<Utc>,
    pub time_until: String,
    pub seconds_until: i64,
    pub direction: String,
    pub position_to_open: String,
    pub expected_profit_usdt: f64,
}

/// Contents of the schedule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleReport {
    pub top_rates: Vec<RateEntry>,
    pub update_time: DateTime<Utc>,
    pub total_pairs: usize,
    pub filtered_pairs: usize,
    pub top_pairs_count: usize,
    pub min_funding_rate: f64,
    pub trade_amount_usdt: f64,
    pub total_expected_profit: f64,
}

/// "1h 2m 3s", or "passed" once the payout time is behind us.
fn format_time_until(seconds: i64) -> String {
    if seconds <= 0 {
        return "passed".to_string();
    }
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours}h {minutes}m {secs}s")
}

impl ScheduleReport {
    pub fn build(ranked: &RankedSchedule, config: &StrategyConfig, now: DateTime<Utc>) -> Self {
        let mut total_expected = Decimal::ZERO;
        let top_rates: Vec<RateEntry> = ranked
            .candidates
            .iter()
            .map(|c| {
                let expected = c.expected_profit(config.trade_notional);
                total_expected += expected;
                let seconds_until = c.time_until(now).num_seconds();
                RateEntry {
                    symbol: c.quote.symbol.clone(),
                    rate: num(c.quote.predicted_rate),
                    rate_percent: num(to_percent(c.quote.predicted_rate)),
                    abs_rate: num(c.abs_rate),
                    abs_rate_percent: num(to_percent(c.abs_rate)),
                    next_funding_time: c.quote.next_funding_time,
                    time_until: format_time_until(seconds_until),
                    seconds_until,
                    direction: c.direction.as_str().to_string(),
                    position_to_open: match c.side {
                        OrderSide::Sell => "SHORT".to_string(),
                        OrderSide::Buy => "LONG".to_string(),
                    },
                    expected_profit_usdt: num(expected),
                }
            })
            .collect();

        Self {
            top_pairs_count: top_rates.len(),
            top_rates,
            update_time: now,
            total_pairs: ranked.total_pairs,
            filtered_pairs: ranked.filtered_pairs,
            min_funding_rate: num(config.min_abs_rate),
            trade_amount_usdt: num(config.trade_notional),
            total_expected_profit: num(total_expected),
        }
    }

    pub fn positive_count(&self) -> usize {
        self.top_rates.iter().filter(|r| r.rate > 0.0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{FundingQuote, ScheduleSnapshot};
    use crate::ledger::NewPosition;
    use crate::strategy::RankingPolicy;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn test_time_until_format() {
        assert_eq!(format_time_until(3723), "1h 2m 3s");
        assert_eq!(format_time_until(9), "0h 0m 9s");
        assert_eq!(format_time_until(0), "passed");
    }

    #[test]
    fn test_schedule_report_fields() {
        let now = Utc::now();
        let snapshot = ScheduleSnapshot::new(
            vec![
                FundingQuote::new("A", dec!(0.0008), now + Duration::seconds(8), dec!(1)),
                FundingQuote::new("B", dec!(-0.0012), now + Duration::seconds(9), dec!(1)),
                FundingQuote::new("C", dec!(0.00005), now + Duration::seconds(5), dec!(1)),
            ],
            now,
        );
        let config = StrategyConfig::default();
        let ranked = RankingPolicy::from_config(&config).rank(&snapshot);
        let report = ScheduleReport::build(&ranked, &config, now);

        assert_eq!(report.total_pairs, 3);
        assert_eq!(report.filtered_pairs, 2);
        assert_eq!(report.top_rates[0].symbol, "B");
        assert_eq!(report.top_rates[0].position_to_open, "LONG");
        assert_eq!(report.top_rates[0].seconds_until, 9);
        assert_eq!(report.top_rates[0].direction, "negative");
        assert_eq!(report.top_rates[1].position_to_open, "SHORT");
        assert_eq!(report.top_rates[1].direction, "positive");
        assert_eq!(report.positive_count(), 1);
        // Pairs actually listed, not the configured limit
        assert_eq!(report.top_pairs_count, 2);
        // (0.0012 + 0.0008) * 10
        assert!((report.total_expected_profit - 0.02).abs() < 1e-12);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["top_rates"][0]["abs_rate_percent"].is_number());
    }

    #[test]
    fn test_status_report_lists_open_positions() {
        let now = Utc::now();
        let mut ledger = PositionLedger::new();
        ledger
            .open_position(NewPosition {
                order_id: "42".into(),
                symbol: "ETHUSDT".into(),
                side: OrderSide::Sell,
                size: dec!(0.01),
                entry_price: dec!(3000),
                entry_time: now,
                funding_time: now,
                funding_rate: dec!(0.0005),
            })
            .unwrap();

        let report = StatusReport::build(
            true,
            now,
            dec!(100),
            &ledger,
            &StrategyConfig::default(),
            now,
        );
        assert!(report.trading_bot.running);
        assert_eq!(report.active_trades.len(), 1);
        assert_eq!(report.active_trades[0].order_id, "42");
        assert_eq!(report.config.top_pairs_count, 20);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["active_trades"][0]["side"], "Sell");
        assert_eq!(json["config"]["selection_mode"], "global");
        assert_eq!(json["statistics"]["total_trades"], 0);
    }
}
