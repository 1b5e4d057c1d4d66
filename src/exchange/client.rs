//! Bybit v5 REST API client.

use super::traits::{FundingQuote, RateSource, ScheduleSnapshot};
use super::types::*;
use crate::config::BybitConfig;
use crate::error::SniperError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

const BASE_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const RECV_WINDOW_MS: u64 = 5000;

/// Bybit client for linear (USDT-margined) perpetuals.
///
/// Order sizing is answered from caches: last prices are refreshed by every
/// schedule fetch and instrument rules by [`RateSource::load_symbols`], so a
/// sizing call never costs a request.
pub struct BybitClient {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    last_prices: RwLock<HashMap<String, Decimal>>,
    instruments: RwLock<HashMap<String, InstrumentRules>>,
}

impl BybitClient {
    /// Create a new Bybit client from configuration.
    pub fn new(config: &BybitConfig) -> Result<Self> {
        let base_url = if config.testnet { TESTNET_URL } else { BASE_URL };
        Self::with_base_url(config, base_url)
    }

    /// Create a client against an explicit endpoint.
    pub fn with_base_url(config: &BybitConfig, base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            base_url: base_url.into(),
            last_prices: RwLock::new(HashMap::new()),
            instruments: RwLock::new(HashMap::new()),
        })
    }

    /// HMAC-SHA256 over `timestamp + api_key + recv_window + payload`.
    fn sign(&self, timestamp: i64, payload: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| anyhow!("invalid signing key: {e}"))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(RECV_WINDOW_MS.to_string().as_bytes());
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_headers(
        &self,
        request: reqwest::RequestBuilder,
        payload: &str,
    ) -> Result<reqwest::RequestBuilder> {
        let timestamp = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp, payload)?;
        Ok(request
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS.to_string())
            .header("X-BAPI-SIGN", signature))
    }

    async fn get_public<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {path}"))?;

        unwrap_envelope(read_envelope(response, path).await?, path)
    }

    async fn get_signed<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let request = self.signed_headers(self.http.get(&url), query)?;
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to fetch {path}"))?;

        unwrap_envelope(read_envelope(response, path).await?, path)
    }

    async fn post_signed<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>> {
        let url = format!("{}{}", self.base_url, path);
        let payload = serde_json::to_string(body).context("Failed to encode request body")?;
        let request = self.signed_headers(self.http.post(&url), &payload)?;
        let response = request
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .with_context(|| format!("Failed to post {path}"))?;

        read_envelope(response, path).await
    }

    // ==================== Market Data (Public) ====================

    /// Fetch every linear ticker in one request.
    #[instrument(skip(self))]
    pub async fn get_linear_tickers(&self) -> Result<Vec<LinearTicker>> {
        let tickers: TickerList = self
            .get_public("/v5/market/tickers", "category=linear")
            .await?;
        Ok(tickers.list)
    }

    /// Page through instrument metadata for linear contracts.
    #[instrument(skip(self))]
    pub async fn get_instruments(&self) -> Result<Vec<InstrumentInfo>> {
        let mut instruments = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut query = "category=linear&limit=1000".to_string();
            if !cursor.is_empty() {
                query.push_str(&format!("&cursor={}", urlencoding::encode(&cursor)));
            }

            let page: InstrumentList = self
                .get_public("/v5/market/instruments-info", &query)
                .await?;
            instruments.extend(page.list);

            if page.next_page_cursor.is_empty() || page.next_page_cursor == cursor {
                break;
            }
            cursor = page.next_page_cursor;
        }

        Ok(instruments)
    }

    /// Cached instrument rules for a symbol, if metadata has been loaded.
    pub async fn instrument_rules(&self, symbol: &str) -> Option<InstrumentRules> {
        self.instruments.read().await.get(symbol).copied()
    }
}

/// Reject non-2xx statuses before decoding the body.
async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
    path: &str,
) -> Result<ApiResponse<T>> {
    let response = response
        .error_for_status()
        .with_context(|| format!("{path} request failed"))?;
    response
        .json()
        .await
        .with_context(|| format!("Failed to parse {path} response"))
}

fn unwrap_envelope<T>(envelope: ApiResponse<T>, path: &str) -> Result<T> {
    if envelope.ret_code != 0 {
        anyhow::bail!(
            "{path} returned retCode {}: {}",
            envelope.ret_code,
            envelope.ret_msg
        );
    }
    envelope
        .result
        .with_context(|| format!("{path} returned no result"))
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

fn parse_millis(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|ms| *ms > 0)
        .and_then(DateTime::from_timestamp_millis)
}

/// Turn a ticker into a quote. Zero rates and missing fields yield `None`.
pub fn quote_from_ticker(ticker: &LinearTicker) -> Option<FundingQuote> {
    let rate = parse_decimal(&ticker.funding_rate)?;
    if rate.is_zero() {
        return None;
    }
    let next_funding_time = parse_millis(&ticker.next_funding_time)?;
    let last_price = parse_decimal(&ticker.last_price).filter(|p| *p > Decimal::ZERO)?;
    Some(FundingQuote::new(
        ticker.symbol.clone(),
        rate,
        next_funding_time,
        last_price,
    ))
}

#[async_trait]
impl RateSource for BybitClient {
    async fn get_funding_schedule(&self) -> Result<ScheduleSnapshot> {
        let fetched_at = Utc::now();
        let tickers = self.get_linear_tickers().await?;

        let mut prices = HashMap::with_capacity(tickers.len());
        let mut quotes = Vec::with_capacity(tickers.len());
        for ticker in &tickers {
            if let Some(price) = parse_decimal(&ticker.last_price).filter(|p| *p > Decimal::ZERO) {
                prices.insert(ticker.symbol.clone(), price);
            }
            if let Some(quote) = quote_from_ticker(ticker) {
                quotes.push(quote);
            }
        }

        debug!(
            tickers = tickers.len(),
            quotes = quotes.len(),
            "Fetched funding schedule"
        );

        self.last_prices.write().await.extend(prices);
        Ok(ScheduleSnapshot::new(quotes, fetched_at))
    }

    #[instrument(skip(self))]
    async fn get_quote(&self, symbol: &str) -> Result<Decimal> {
        let query = format!("category=linear&symbol={}", urlencoding::encode(symbol));
        let tickers: TickerList = self.get_public("/v5/market/tickers", &query).await?;

        let price = tickers
            .list
            .iter()
            .find(|t| t.symbol == symbol)
            .and_then(|t| parse_decimal(&t.last_price))
            .filter(|p| *p > Decimal::ZERO)
            .with_context(|| format!("No last price for {symbol}"))?;

        self.last_prices
            .write()
            .await
            .insert(symbol.to_string(), price);
        Ok(price)
    }

    async fn resolve_order_size(&self, symbol: &str, notional: Decimal) -> Result<Decimal> {
        let rules = self
            .instrument_rules(symbol)
            .await
            .with_context(|| format!("No instrument metadata for {symbol}"))?;
        let price = self
            .last_prices
            .read()
            .await
            .get(symbol)
            .copied()
            .with_context(|| format!("No cached price for {symbol}"))?;

        Ok(rules.size_for_notional(notional, price))
    }

    #[instrument(skip(self))]
    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<String> {
        let order = OrderRequest::market(symbol, side, quantity, reduce_only);
        debug!("Placing order: {:?}", order);

        let response: ApiResponse<OrderCreated> =
            self.post_signed("/v5/order/create", &order).await?;

        if response.ret_code != 0 {
            warn!(%symbol, ret_code = response.ret_code, reason = %response.ret_msg, "Order rejected");
            return Err(SniperError::OrderRejected {
                symbol: symbol.to_string(),
                reason: format!("retCode {}: {}", response.ret_code, response.ret_msg),
            }
            .into());
        }

        let created = response
            .result
            .context("Order response carried no result")?;
        Ok(created.order_id)
    }

    #[instrument(skip(self))]
    async fn get_balance(&self, asset: &str) -> Result<Decimal> {
        let query = format!("accountType=UNIFIED&coin={}", urlencoding::encode(asset));
        let wallets: WalletBalanceList = self
            .get_signed("/v5/account/wallet-balance", &query)
            .await?;

        let balance = wallets
            .list
            .iter()
            .flat_map(|account| account.coin.iter())
            .find(|coin| coin.coin == asset)
            .and_then(|coin| parse_decimal(&coin.wallet_balance))
            .unwrap_or(Decimal::ZERO);
        Ok(balance)
    }

    async fn load_symbols(&self) -> Result<usize> {
        let instruments = self.get_instruments().await?;
        let rules: HashMap<String, InstrumentRules> = instruments
            .iter()
            .filter(|i| i.is_tradable_perpetual())
            .map(|i| (i.symbol.clone(), i.rules()))
            .collect();

        let count = rules.len();
        *self.instruments.write().await = rules;
        info!(count, "Loaded instrument metadata");
        Ok(count)
    }
}
