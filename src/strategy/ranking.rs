//! Candidate ranking over a funding schedule snapshot.

use crate::config::StrategyConfig;
use crate::exchange::{FundingQuote, OrderSide, ScheduleSnapshot};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// How the candidate set is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Top N by absolute rate, regardless of sign
    #[default]
    Global,
    /// Top N positive plus top N negative
    Split,
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionMode::Global => f.write_str("global"),
            SelectionMode::Split => f.write_str("split"),
        }
    }
}

/// Sign of the predicted rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FundingDirection {
    Positive,
    Negative,
}

impl FundingDirection {
    /// Sign of the rate, as written to the schedule file.
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingDirection::Positive => "positive",
            FundingDirection::Negative => "negative",
        }
    }
}

/// A ranked quote with the side that collects its funding.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub quote: FundingQuote,
    pub abs_rate: Decimal,
    pub direction: FundingDirection,
    pub side: OrderSide,
}

impl Candidate {
    fn from_quote(quote: &FundingQuote) -> Self {
        let direction = if quote.predicted_rate > Decimal::ZERO {
            FundingDirection::Positive
        } else {
            FundingDirection::Negative
        };
        Self {
            quote: quote.clone(),
            abs_rate: quote.predicted_rate.abs(),
            direction,
            side: OrderSide::receiving_funding(quote.predicted_rate),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.quote.symbol
    }

    /// Funding collected on `notional` at the predicted rate.
    pub fn expected_profit(&self, notional: Decimal) -> Decimal {
        self.abs_rate * notional
    }

    pub fn time_until(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.quote.next_funding_time - now
    }
}

/// Ranking output plus the totals reported alongside it.
#[derive(Debug, Clone, Default)]
pub struct RankedSchedule {
    pub candidates: Vec<Candidate>,
    /// Quotes in the snapshot
    pub total_pairs: usize,
    /// Quotes that passed the rate filter
    pub filtered_pairs: usize,
}

#[derive(Debug, Clone)]
pub struct RankingPolicy {
    pub min_abs_rate: Decimal,
    pub top_n: usize,
    pub mode: SelectionMode,
}

/// |rate| descending, then symbol ascending.
fn by_rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.abs_rate
        .cmp(&a.abs_rate)
        .then_with(|| a.quote.symbol.cmp(&b.quote.symbol))
}

impl RankingPolicy {
    pub fn new(min_abs_rate: Decimal, top_n: usize, mode: SelectionMode) -> Self {
        Self {
            min_abs_rate,
            top_n,
            mode,
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(config.min_abs_rate, config.top_n, config.selection_mode)
    }

    /// Upper bound on the candidate count.
    pub fn max_candidates(&self) -> usize {
        match self.mode {
            SelectionMode::Global => self.top_n,
            SelectionMode::Split => self.top_n * 2,
        }
    }

    pub fn rank(&self, snapshot: &ScheduleSnapshot) -> RankedSchedule {
        let mut eligible: Vec<Candidate> = snapshot
            .quotes()
            .filter(|q| !q.predicted_rate.is_zero() && q.predicted_rate.abs() >= self.min_abs_rate)
            .map(Candidate::from_quote)
            .collect();
        let filtered_pairs = eligible.len();

        eligible.sort_by(by_rank);

        let candidates = match self.mode {
            SelectionMode::Global => {
                eligible.truncate(self.top_n);
                eligible
            }
            SelectionMode::Split => {
                let (positive, negative): (Vec<_>, Vec<_>) = eligible
                    .into_iter()
                    .partition(|c| c.direction == FundingDirection::Positive);
                let mut union: Vec<Candidate> = positive
                    .into_iter()
                    .take(self.top_n)
                    .chain(negative.into_iter().take(self.top_n))
                    .collect();
                union.sort_by(by_rank);
                union
            }
        };

        RankedSchedule {
            candidates,
            total_pairs: snapshot.len(),
            filtered_pairs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(rates: &[(&str, Decimal)]) -> ScheduleSnapshot {
        let now = Utc::now();
        ScheduleSnapshot::new(
            rates
                .iter()
                .map(|(symbol, rate)| FundingQuote::new(*symbol, *rate, now, dec!(1))),
            now,
        )
    }

    fn symbols(ranked: &RankedSchedule) -> Vec<&str> {
        ranked.candidates.iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn test_filters_small_and_zero_rates() {
        let policy = RankingPolicy::new(dec!(0.0001), 20, SelectionMode::Global);
        let ranked = policy.rank(&snapshot(&[
            ("A", dec!(0.0008)),
            ("B", dec!(-0.0012)),
            ("C", dec!(0.00005)),
            ("D", Decimal::ZERO),
            ("E", dec!(-0.0001)),
        ]));

        assert_eq!(symbols(&ranked), vec!["B", "A", "E"]);
        assert_eq!(ranked.total_pairs, 5);
        assert_eq!(ranked.filtered_pairs, 3);
    }

    #[test]
    fn test_zero_threshold_still_excludes_zero_rate() {
        let policy = RankingPolicy::new(Decimal::ZERO, 20, SelectionMode::Global);
        let ranked = policy.rank(&snapshot(&[("A", Decimal::ZERO), ("B", dec!(0.00001))]));
        assert_eq!(symbols(&ranked), vec!["B"]);
    }

    #[test]
    fn test_tie_break_by_symbol() {
        let policy = RankingPolicy::new(dec!(0.0001), 20, SelectionMode::Global);
        let ranked = policy.rank(&snapshot(&[
            ("ZECUSDT", dec!(0.0005)),
            ("ADAUSDT", dec!(-0.0005)),
            ("BTCUSDT", dec!(0.0005)),
        ]));
        assert_eq!(symbols(&ranked), vec!["ADAUSDT", "BTCUSDT", "ZECUSDT"]);
    }

    #[test]
    fn test_global_mode_truncates() {
        let policy = RankingPolicy::new(dec!(0.0001), 2, SelectionMode::Global);
        let ranked = policy.rank(&snapshot(&[
            ("A", dec!(0.001)),
            ("B", dec!(0.002)),
            ("C", dec!(-0.003)),
        ]));
        assert_eq!(symbols(&ranked), vec!["C", "B"]);
        assert!(ranked.candidates.len() <= policy.max_candidates());
    }

    #[test]
    fn test_split_mode_takes_top_of_each_sign() {
        let policy = RankingPolicy::new(dec!(0.0001), 1, SelectionMode::Split);
        let ranked = policy.rank(&snapshot(&[
            ("A", dec!(0.001)),
            ("B", dec!(0.004)),
            ("C", dec!(-0.002)),
            ("D", dec!(-0.003)),
        ]));
        // B is the best positive, D the best negative, re-sorted by |rate|
        assert_eq!(symbols(&ranked), vec!["B", "D"]);
        assert_eq!(policy.max_candidates(), 2);
    }

    #[test]
    fn test_candidate_side_and_profit() {
        let policy = RankingPolicy::new(dec!(0.0001), 20, SelectionMode::Global);
        let ranked = policy.rank(&snapshot(&[("A", dec!(0.0008)), ("B", dec!(-0.0012))]));

        let b = &ranked.candidates[0];
        assert_eq!(b.side, OrderSide::Buy);
        assert_eq!(b.direction, FundingDirection::Negative);
        assert_eq!(b.expected_profit(dec!(10)), dec!(0.012));

        let a = &ranked.candidates[1];
        assert_eq!(a.side, OrderSide::Sell);
        assert_eq!(a.direction, FundingDirection::Positive);
    }

    #[test]
    fn test_empty_snapshot() {
        let policy = RankingPolicy::new(dec!(0.0001), 20, SelectionMode::Split);
        let ranked = policy.rank(&ScheduleSnapshot::empty(Utc::now()));
        assert!(ranked.candidates.is_empty());
        assert_eq!(ranked.total_pairs, 0);
    }
}
