//! Shared request spacing and per-call timeouts for exchange access.
//!
//! Every call through [`Throttled`] waits on one "last request" watermark, so
//! no two calls leave the process closer together than the configured
//! interval, whichever component issued them. A call that hangs past the
//! timeout is reported as an ordinary error instead of stalling the loop.

use super::traits::{RateSource, ScheduleSnapshot};
use super::types::OrderSide;
use crate::error::SniperError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Minimum-interval gate shared by all callers.
#[derive(Debug)]
pub struct RequestThrottle {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until a request may be issued, then stamp the watermark.
    ///
    /// The lock is held across the wait so concurrent callers queue up behind
    /// each other instead of all waking at the same instant.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                trace!(wait_ms = wait.as_millis() as u64, "Throttling request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

/// Rate-limited, time-bounded view over any [`RateSource`].
pub struct Throttled<S> {
    inner: S,
    throttle: Arc<RequestThrottle>,
    timeout: Duration,
}

impl<S: RateSource> Throttled<S> {
    pub fn new(inner: S, throttle: Arc<RequestThrottle>, timeout: Duration) -> Self {
        Self {
            inner,
            throttle,
            timeout,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn call<T, F>(&self, operation: &'static str, request: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send,
    {
        self.throttle.acquire().await;
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SniperError::from_call(operation, e).into()),
            Err(_) => Err(SniperError::Timeout {
                operation,
                after: self.timeout,
            }
            .into()),
        }
    }
}

#[async_trait]
impl<S: RateSource> RateSource for Throttled<S> {
    async fn get_funding_schedule(&self) -> anyhow::Result<ScheduleSnapshot> {
        self.call("get_funding_schedule", self.inner.get_funding_schedule())
            .await
    }

    async fn get_quote(&self, symbol: &str) -> anyhow::Result<Decimal> {
        self.call("get_quote", self.inner.get_quote(symbol)).await
    }

    async fn resolve_order_size(
        &self,
        symbol: &str,
        notional: Decimal,
    ) -> anyhow::Result<Decimal> {
        self.call(
            "resolve_order_size",
            self.inner.resolve_order_size(symbol, notional),
        )
        .await
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> anyhow::Result<String> {
        self.call(
            "submit_order",
            self.inner.submit_order(symbol, side, quantity, reduce_only),
        )
        .await
    }

    async fn get_balance(&self, asset: &str) -> anyhow::Result<Decimal> {
        self.call("get_balance", self.inner.get_balance(asset)).await
    }

    async fn load_symbols(&self) -> anyhow::Result<usize> {
        self.call("load_symbols", self.inner.load_symbols()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::traits::MockRateSource;
    use rust_decimal_macros::dec;

    struct HangingSource;

    #[async_trait]
    impl RateSource for HangingSource {
        async fn get_funding_schedule(&self) -> anyhow::Result<ScheduleSnapshot> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ScheduleSnapshot::empty(chrono::Utc::now()))
        }

        async fn get_quote(&self, _symbol: &str) -> anyhow::Result<Decimal> {
            Ok(dec!(1))
        }

        async fn resolve_order_size(
            &self,
            _symbol: &str,
            _notional: Decimal,
        ) -> anyhow::Result<Decimal> {
            Ok(dec!(1))
        }

        async fn submit_order(
            &self,
            _symbol: &str,
            _side: OrderSide,
            _quantity: Decimal,
            _reduce_only: bool,
        ) -> anyhow::Result<String> {
            Ok("1".to_string())
        }

        async fn get_balance(&self, _asset: &str) -> anyhow::Result<Decimal> {
            Ok(dec!(100))
        }
    }

    #[tokio::test]
    async fn test_throttle_spaces_requests() {
        let throttle = RequestThrottle::new(Duration::from_millis(40));
        let start = Instant::now();
        for _ in 0..3 {
            throttle.acquire().await;
        }
        // First call passes immediately, the next two wait one interval each
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_throttle_shared_between_sources() {
        let throttle = Arc::new(RequestThrottle::new(Duration::from_millis(40)));

        let mut first = MockRateSource::new();
        first.expect_get_quote().returning(|_| Ok(dec!(100)));
        let mut second = MockRateSource::new();
        second.expect_get_balance().returning(|_| Ok(dec!(50)));

        let a = Throttled::new(first, throttle.clone(), Duration::from_secs(1));
        let b = Throttled::new(second, throttle.clone(), Duration::from_secs(1));

        let start = Instant::now();
        a.get_quote("BTCUSDT").await.unwrap();
        b.get_balance("USDT").await.unwrap();
        a.get_quote("BTCUSDT").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_inner_error_becomes_transient() {
        let mut source = MockRateSource::new();
        source
            .expect_submit_order()
            .times(1)
            .returning(|_, _, _, _| Err(anyhow::anyhow!("insufficient margin")));

        let throttled = Throttled::new(
            source,
            Arc::new(RequestThrottle::new(Duration::ZERO)),
            Duration::from_secs(1),
        );

        let err = throttled
            .submit_order("ETHUSDT", OrderSide::Buy, dec!(0.01), false)
            .await
            .unwrap_err();

        let kind = err.downcast_ref::<SniperError>().unwrap();
        assert!(matches!(
            kind,
            SniperError::Transient {
                operation: "submit_order",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_rejection_keeps_its_kind() {
        let mut source = MockRateSource::new();
        source.expect_submit_order().returning(|symbol, _, _, _| {
            Err(SniperError::OrderRejected {
                symbol: symbol.to_string(),
                reason: "reduce-only would increase position".into(),
            }
            .into())
        });

        let throttled = Throttled::new(
            source,
            Arc::new(RequestThrottle::new(Duration::ZERO)),
            Duration::from_secs(1),
        );
        let err = throttled
            .submit_order("BTCUSDT", OrderSide::Sell, dec!(1), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SniperError>(),
            Some(SniperError::OrderRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_hung_call_times_out() {
        let throttled = Throttled::new(
            HangingSource,
            Arc::new(RequestThrottle::new(Duration::ZERO)),
            Duration::from_millis(50),
        );

        let err = throttled.get_funding_schedule().await.unwrap_err();
        let kind = err.downcast_ref::<SniperError>().unwrap();
        assert!(matches!(kind, SniperError::Timeout { .. }));
        assert!(kind.is_retryable());
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let mut source = MockRateSource::new();
        source
            .expect_resolve_order_size()
            .withf(|symbol, notional| symbol == "SOLUSDT" && *notional == dec!(10))
            .returning(|_, _| Ok(dec!(0.1)));

        let throttled = Throttled::new(
            source,
            Arc::new(RequestThrottle::new(Duration::ZERO)),
            Duration::from_secs(1),
        );
        let size = throttled.resolve_order_size("SOLUSDT", dec!(10)).await;
        tokio_test::assert_ok!(&size);
        assert_eq!(size.unwrap(), dec!(0.1));
    }
}
