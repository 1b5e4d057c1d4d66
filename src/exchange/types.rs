//! Type definitions for Bybit v5 API requests and responses.

use crate::utils::round_down_to_lot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side that reduces a position opened with `self`.
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Side that receives funding for a predicted rate.
    ///
    /// Positive funding: longs pay shorts, so open a short.
    /// Negative funding: shorts pay longs, so open a long.
    pub fn receiving_funding(rate: Decimal) -> Self {
        if rate > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quantity rules for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentRules {
    pub qty_step: Decimal,
    pub min_order_qty: Decimal,
}

impl InstrumentRules {
    /// Quantity bought by `notional` at `price`, rounded down to the step.
    ///
    /// Zero when the result falls below the minimum order quantity.
    pub fn size_for_notional(&self, notional: Decimal, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO || notional <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let size = round_down_to_lot(notional / price, self.qty_step).normalize();
        if size < self.min_order_qty || size <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            size
        }
    }
}

/// Common response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    pub result: Option<T>,
}

/// `GET /v5/market/tickers` result.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerList {
    #[serde(default)]
    pub list: Vec<LinearTicker>,
}

/// Linear contract ticker. Numeric fields arrive as strings and may be empty.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinearTicker {
    pub symbol: String,
    #[serde(default)]
    pub last_price: String,
    #[serde(default)]
    pub funding_rate: String,
    /// Milliseconds since epoch
    #[serde(default)]
    pub next_funding_time: String,
}

/// `GET /v5/market/instruments-info` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentList {
    #[serde(default)]
    pub list: Vec<InstrumentInfo>,
    #[serde(default)]
    pub next_page_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfo {
    pub symbol: String,
    #[serde(default)]
    pub contract_type: String,
    #[serde(default)]
    pub status: String,
    pub lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSizeFilter {
    #[serde(with = "rust_decimal::serde::str")]
    pub qty_step: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_order_qty: Decimal,
}

impl InstrumentInfo {
    pub fn is_tradable_perpetual(&self) -> bool {
        self.status == "Trading" && self.contract_type == "LinearPerpetual"
    }

    pub fn rules(&self) -> InstrumentRules {
        InstrumentRules {
            qty_step: self.lot_size_filter.qty_step,
            min_order_qty: self.lot_size_filter.min_order_qty,
        }
    }
}

/// `POST /v5/order/create` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub category: &'static str,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: &'static str,
    pub qty: String,
    /// 0 = one-way mode
    pub position_idx: u8,
    pub time_in_force: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal, reduce_only: bool) -> Self {
        Self {
            category: "linear",
            symbol: symbol.to_string(),
            side,
            order_type: "Market",
            qty: quantity.normalize().to_string(),
            position_idx: 0,
            time_in_force: "IOC",
            reduce_only,
        }
    }
}

/// `POST /v5/order/create` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    /// Rejections come back with an empty `result` object
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
}

/// `GET /v5/account/wallet-balance` result.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletBalanceList {
    #[serde(default)]
    pub list: Vec<WalletAccount>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub coin: Vec<CoinBalance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinBalance {
    pub coin: String,
    #[serde(default)]
    pub wallet_balance: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_receiving_funding() {
        assert_eq!(OrderSide::receiving_funding(dec!(0.0008)), OrderSide::Sell);
        assert_eq!(OrderSide::receiving_funding(dec!(-0.0012)), OrderSide::Buy);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_size_rounds_down_to_step() {
        let rules = InstrumentRules {
            qty_step: dec!(0.01),
            min_order_qty: dec!(0.01),
        };
        // 10 / 3 = 3.333.. -> 3.33
        assert_eq!(rules.size_for_notional(dec!(10), dec!(3)), dec!(3.33));
    }

    #[test]
    fn test_size_below_minimum_is_zero() {
        let rules = InstrumentRules {
            qty_step: dec!(0.001),
            min_order_qty: dec!(0.001),
        };
        // 10 USDT of BTC at 50k = 0.0002 -> rounds to 0.000
        assert_eq!(rules.size_for_notional(dec!(10), dec!(50000)), Decimal::ZERO);
        assert_eq!(rules.size_for_notional(dec!(10), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_order_request_serialization() {
        let order = OrderRequest::market("ETHUSDT", OrderSide::Buy, dec!(0.010), true);
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["side"], "Buy");
        assert_eq!(json["orderType"], "Market");
        assert_eq!(json["qty"], "0.01");
        assert_eq!(json["positionIdx"], 0);
        assert_eq!(json["reduceOnly"], true);

        let open = OrderRequest::market("ETHUSDT", OrderSide::Sell, dec!(1), false);
        let json = serde_json::to_value(&open).unwrap();
        assert!(json.get("reduceOnly").is_none());
    }

    #[test]
    fn test_parse_instrument() {
        let raw = r#"{
            "symbol": "SOLUSDT",
            "contractType": "LinearPerpetual",
            "status": "Trading",
            "lotSizeFilter": { "maxOrderQty": "79770", "minOrderQty": "0.1", "qtyStep": "0.1" }
        }"#;
        let info: InstrumentInfo = serde_json::from_str(raw).unwrap();
        assert!(info.is_tradable_perpetual());
        assert_eq!(info.rules().qty_step, dec!(0.1));
    }
}
