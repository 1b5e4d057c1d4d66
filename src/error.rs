//! Error taxonomy for the funding fee sniper.
//!
//! Adapters and the binary use `anyhow` with context; this enum is used where
//! callers need to branch on the kind of failure (skip a symbol, back off a
//! cycle, refuse to start).

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SniperError {
    /// A schedule/quote/order/balance call failed. Retried next cycle.
    #[error("{operation} failed: {source}")]
    Transient {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A rate source call did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Resolved order size is below the instrument minimum.
    #[error("order size for {symbol} below instrument minimum (notional {notional})")]
    Sizing { symbol: String, notional: Decimal },

    /// The exchange refused an order.
    #[error("order rejected for {symbol}: {reason}")]
    OrderRejected { symbol: String, reason: String },

    /// The ledger already holds an open position for the symbol.
    #[error("position already open for {symbol}")]
    DuplicatePosition { symbol: String },

    /// Missing credentials or invalid settings at startup. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl SniperError {
    /// Wrap a failed rate source call.
    pub fn transient(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Transient { operation, source }
    }

    /// Recover the kind of a failed rate source call.
    ///
    /// Errors already classified (for example by the throttling layer or an
    /// order rejection) keep their kind; anything else becomes `Transient`.
    pub fn from_call(operation: &'static str, err: anyhow::Error) -> Self {
        match err.downcast::<SniperError>() {
            Ok(kind) => kind,
            Err(err) => Self::transient(operation, err),
        }
    }

    /// Whether the failure should be retried on a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Timeout { .. } | Self::OrderRejected { .. }
        )
    }
}

pub type SniperResult<T> = std::result::Result<T, SniperError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_retryable_kinds() {
        let transient = SniperError::transient("get_quote", anyhow::anyhow!("connection reset"));
        assert!(transient.is_retryable());

        let timeout = SniperError::Timeout {
            operation: "submit_order",
            after: Duration::from_secs(15),
        };
        assert!(timeout.is_retryable());

        let sizing = SniperError::Sizing {
            symbol: "BTCUSDT".to_string(),
            notional: dec!(10),
        };
        assert!(!sizing.is_retryable());
        assert!(!SniperError::Configuration("missing api key".into()).is_retryable());
    }

    #[test]
    fn test_from_call_keeps_existing_kind() {
        let rejected: anyhow::Error = SniperError::OrderRejected {
            symbol: "ETHUSDT".into(),
            reason: "insufficient margin".into(),
        }
        .into();
        assert!(matches!(
            SniperError::from_call("submit_order", rejected),
            SniperError::OrderRejected { .. }
        ));

        let plain = anyhow::anyhow!("connection refused");
        assert!(matches!(
            SniperError::from_call("get_quote", plain),
            SniperError::Transient {
                operation: "get_quote",
                ..
            }
        ));
    }

    #[test]
    fn test_display_includes_operation() {
        let err = SniperError::transient("get_funding_schedule", anyhow::anyhow!("503"));
        assert_eq!(err.to_string(), "get_funding_schedule failed: 503");
    }
}
