//! Public exchange REST adapter (Poloniex legacy API).
//!
//! Private commands POST a form-encoded body to `/tradingApi`, signed by
//! HMAC-SHA-512 of the exact body bytes (`Sign` header, public key in
//! `Key`), and carry a strictly increasing nanosecond nonce. Public
//! commands GET `/public` unsigned.
//!
//! Balances are served from a 60-second cache owned by this client; each
//! worker holds its own client, so the cache has a single writer.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::config::TradingSettings;
use crate::utils::decimal::{div8, round_down8};
use crate::utils::signing::hmac_sha512_hex;

use super::traits::TradingVenue;
use super::types::{Balance, TradingOrder};

const BALANCE_CACHE_TTL: Duration = Duration::from_secs(60);
const RETRY_DELAY: Duration = Duration::from_secs(10);
const NONCE_ATTEMPTS: usize = 10;
const BOOK_DEPTH: &str = "20";

#[derive(Default)]
struct BalanceCache {
    fetched_at: Option<Instant>,
    balances: HashMap<String, Balance>,
}

/// Typed client for the exchange.
pub struct PoloniexClient {
    http: Client,
    base_url: String,
    public_key: String,
    secret_key: String,
    last_nonce: AtomicU64,
    balance_cache: RwLock<BalanceCache>,
}

#[derive(Debug, Clone, Copy)]
enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    fn command(self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

/// Known business rejections from the trade endpoints.
#[derive(Debug, PartialEq)]
enum TradeError {
    MarketFrozen,
    Throttled,
    UnableToFill,
    Other,
}

fn classify_trade_error(error: &str) -> TradeError {
    if error.contains("This market is frozen") {
        TradeError::MarketFrozen
    } else if error.contains("This IP has been temporarily throttled.") {
        TradeError::Throttled
    } else if error.contains("Unable to fill order") {
        TradeError::UnableToFill
    } else {
        TradeError::Other
    }
}

#[derive(Debug, Deserialize)]
struct ResultingTrade {
    #[serde(rename = "takerAdjustment")]
    taker_adjustment: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TradeResponse {
    Rejected {
        error: String,
    },
    Filled {
        #[serde(rename = "orderNumber")]
        #[allow(dead_code)]
        order_number: String,
        #[serde(rename = "resultingTrades", default)]
        resulting_trades: Vec<ResultingTrade>,
    },
}

/// `[price_string, volume_number]` pair as the book endpoint emits them.
#[derive(Debug, Deserialize)]
struct BookLevel(Decimal, Decimal);

#[derive(Debug, Deserialize)]
struct OrderBook {
    #[serde(default)]
    asks: Vec<BookLevel>,
    #[serde(default)]
    bids: Vec<BookLevel>,
}

impl PoloniexClient {
    pub fn new(settings: &TradingSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.url.trim_end_matches('/').to_string(),
            public_key: settings.key.clone(),
            secret_key: settings.secret.clone(),
            last_nonce: AtomicU64::new(0),
            balance_cache: RwLock::new(BalanceCache::default()),
        })
    }

    /// Nanosecond-clock nonce, strictly greater than any prior draw.
    fn next_nonce(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_nanos() as u64;

        let previous = self
            .last_nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |previous| {
                Some(now.max(previous + 1))
            })
            .unwrap_or(0);
        now.max(previous + 1)
    }

    async fn query_public(&self, command: &str, mut params: BTreeMap<&str, String>) -> Option<String> {
        params.insert("command", command.to_string());
        let url = format!("{}/public?{}", self.base_url, encode_query(&params));

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                error!(command, error = %err, "exchange: public request failed");
                return None;
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status != StatusCode::OK {
            error!(command, status = %status, body = %body, "exchange: non-200 response");
            return None;
        }
        if body.is_empty() {
            return None;
        }
        Some(body)
    }

    /// Signed command with stale-nonce recovery: up to [`NONCE_ATTEMPTS`]
    /// submissions, each under a fresh nonce. Returns the raw body, empty
    /// on failure.
    async fn query_private(&self, command: &str, mut params: BTreeMap<&str, String>) -> String {
        params.insert("command", command.to_string());

        let mut raw = String::new();
        for _ in 0..NONCE_ATTEMPTS {
            let nonce = self.next_nonce();
            let (body, status) = self.submit_private(&params, nonce).await;
            raw = body;

            if status == StatusCode::OK {
                break;
            }

            let error = serde_json::from_str::<serde_json::Value>(&raw)
                .ok()
                .and_then(|value| value.get("error")?.as_str().map(str::to_owned));

            match error {
                Some(message) => {
                    raw = String::new();
                    if message.contains("Nonce must be greater than") {
                        continue;
                    }
                    break;
                }
                None => break,
            }
        }

        raw
    }

    async fn submit_private(
        &self,
        params: &BTreeMap<&str, String>,
        nonce: u64,
    ) -> (String, StatusCode) {
        let mut form = params.clone();
        form.insert("nonce", nonce.to_string());
        let body = encode_query(&form);
        let signature = hmac_sha512_hex(self.secret_key.as_bytes(), body.as_bytes());
        let url = format!("{}/tradingApi", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("Key", &self.public_key)
            .header("Sign", &signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                if status != StatusCode::OK {
                    error!(status = %status, body = %text, "exchange: non-200 response");
                }
                (text, status)
            }
            Err(err) => {
                error!(error = %err, "exchange: private request failed");
                (String::new(), StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Shared fill-or-kill price walk for [`TradingVenue::buy`] and
    /// [`TradingVenue::sell`]. `required` is the amount submitted with
    /// every attempt; the price starts at the observed exchange level and
    /// walks toward `internal_price`, which bounds the loop.
    async fn place_fill_or_kill(
        &self,
        side: TradeSide,
        pair: &str,
        trading_price: Decimal,
        internal_price: Decimal,
        required: Decimal,
        internal_pair: &str,
    ) -> bool {
        let mut order_price = trading_price;

        loop {
            let mut params = BTreeMap::new();
            params.insert("currencyPair", pair.to_string());
            params.insert("rate", order_price.to_string());
            params.insert("fillOrKill", "1".to_string());
            params.insert("amount", required.to_string());

            let response = self.query_private(side.command(), params).await;
            if response.is_empty() {
                continue;
            }
            info!(command = side.command(), response = %response, "exchange: trade response");

            let parsed = match serde_json::from_str::<TradeResponse>(&response) {
                Ok(parsed) => parsed,
                Err(err) => {
                    error!(
                        pair = internal_pair,
                        amount = %required,
                        error = %err,
                        response = %response,
                        "exchange: malformed trade response"
                    );
                    return false;
                }
            };

            match parsed {
                TradeResponse::Rejected { error } => match classify_trade_error(&error) {
                    TradeError::MarketFrozen | TradeError::Throttled => {
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                    TradeError::UnableToFill => {
                        order_price = match side {
                            TradeSide::Buy => round_down8(order_price * dec!(1.001)),
                            TradeSide::Sell => round_down8(order_price * dec!(0.999)),
                        };
                        let price_exhausted = match side {
                            TradeSide::Buy => order_price > internal_price,
                            TradeSide::Sell => order_price < internal_price,
                        };
                        if price_exhausted {
                            error!(
                                pair = internal_pair,
                                limit_price = %internal_price,
                                amount = %required,
                                command = side.command(),
                                "exchange: price limit reached, giving up"
                            );
                            return false;
                        }
                        continue;
                    }
                    TradeError::Other => {
                        error!(
                            pair = internal_pair,
                            amount = %required,
                            response = %error,
                            command = side.command(),
                            "exchange: trade rejected"
                        );
                        return false;
                    }
                },
                TradeResponse::Filled {
                    resulting_trades, ..
                } => {
                    let resulted: Decimal = resulting_trades
                        .iter()
                        .map(|trade| trade.taker_adjustment)
                        .sum();
                    let resulted = round_down8(resulted);
                    if resulted < required {
                        error!(
                            resulted = %resulted,
                            required = %required,
                            "exchange: resulted amount lower than required"
                        );
                        return false;
                    }
                    return true;
                }
            }
        }
    }
}

fn encode_query(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

#[async_trait]
impl TradingVenue for PoloniexClient {
    async fn get_trading_balances(&self) -> HashMap<String, Balance> {
        {
            let cache = self.balance_cache.read().await;
            if let Some(fetched_at) = cache.fetched_at {
                if fetched_at.elapsed() < BALANCE_CACHE_TTL {
                    return cache.balances.clone();
                }
            }
        }

        let body = self.query_private("returnBalances", BTreeMap::new()).await;
        if body.is_empty() {
            return HashMap::new();
        }

        let raw: HashMap<String, Decimal> = match serde_json::from_str(&body) {
            Ok(raw) => raw,
            Err(err) => {
                error!(error = %err, "exchange: malformed balances response");
                return HashMap::new();
            }
        };

        let balances: HashMap<String, Balance> = raw
            .into_iter()
            .map(|(currency, balance)| {
                let entry = Balance {
                    currency: currency.clone(),
                    balance,
                    reserved: Decimal::ZERO,
                };
                (currency, entry)
            })
            .collect();

        let mut cache = self.balance_cache.write().await;
        cache.balances = balances.clone();
        cache.fetched_at = Some(Instant::now());

        balances
    }

    async fn get_public_trading_orders(
        &self,
        pair: &str,
        usdc_trading_limit: Decimal,
        crypto_trading_limit: Decimal,
        internal_crypto_balance: Decimal,
        internal_usdc_balance: Decimal,
        pair_min_amount: Decimal,
    ) -> Vec<TradingOrder> {
        let mut params = BTreeMap::new();
        params.insert("currencyPair", pair.to_string());
        params.insert("depth", BOOK_DEPTH.to_string());

        let Some(body) = self.query_public("returnOrderBook", params).await else {
            return Vec::new();
        };
        let book: OrderBook = match serde_json::from_str(&body) {
            Ok(book) => book,
            Err(err) => {
                error!(pair, error = %err, "exchange: malformed order book");
                return Vec::new();
            }
        };

        walk_book(
            &book,
            usdc_trading_limit,
            crypto_trading_limit,
            internal_crypto_balance,
            internal_usdc_balance,
            pair_min_amount,
        )
    }

    async fn buy(
        &self,
        pair: &str,
        trading_price: Decimal,
        internal_price: Decimal,
        amount: Decimal,
        internal_pair: &str,
    ) -> bool {
        // fill-or-kill submits amount plus a 0.3% taker fee envelope
        let required = amount * dec!(1.003);
        self.place_fill_or_kill(
            TradeSide::Buy,
            pair,
            trading_price,
            internal_price,
            required,
            internal_pair,
        )
        .await
    }

    async fn sell(
        &self,
        pair: &str,
        trading_price: Decimal,
        internal_price: Decimal,
        amount: Decimal,
        internal_pair: &str,
    ) -> bool {
        let required = round_down8(amount * internal_price);
        self.place_fill_or_kill(
            TradeSide::Sell,
            pair,
            trading_price,
            internal_price,
            required,
            internal_pair,
        )
        .await
    }

    async fn withdraw(
        &self,
        address: &str,
        amount: Decimal,
        currency: &str,
        withdrawal_network: &str,
    ) -> bool {
        let mut params = BTreeMap::new();
        params.insert("address", address.to_string());
        params.insert("amount", amount.to_string());
        params.insert("currency", currency.to_string());
        if !withdrawal_network.is_empty() {
            params.insert("currencyToWithdrawAs", withdrawal_network.to_string());
        }

        info!(currency, %amount, "exchange: submitting withdrawal");
        let body = self.query_private("withdraw", params).await;
        if body.is_empty() {
            return false;
        }

        let value: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
        if let Some(error) = value.get("error") {
            error!(response = %error, "exchange: withdraw rejected");
            return false;
        }

        true
    }

    async fn get_crypto_address(&self, currency: &str, withdrawal_network: &str) -> String {
        let body = self
            .query_private("returnDepositAddresses", BTreeMap::new())
            .await;
        if body.is_empty() {
            return String::new();
        }

        // memo-style networks publish the address under the network key
        let lookup = if withdrawal_network.is_empty() {
            currency
        } else {
            withdrawal_network
        };

        let value: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
        value
            .get(lookup)
            .and_then(|address| address.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

/// Consolidate the book's top levels against operator limits and kiosk
/// inventory. Asks become kiosk sell orders bounded by the USDC spend
/// limit; bids become kiosk buy orders bounded by the base-asset limit.
/// The cap-then-deduct-then-truncate sequence determines how much
/// inventory each mirrored order consumes downstream, so the order of
/// operations here is load-bearing.
fn walk_book(
    book: &OrderBook,
    usdc_trading_limit: Decimal,
    crypto_trading_limit: Decimal,
    mut internal_crypto_balance: Decimal,
    mut internal_usdc_balance: Decimal,
    pair_min_amount: Decimal,
) -> Vec<TradingOrder> {
    let mut result = Vec::new();

    let mut remaining = usdc_trading_limit;
    if remaining > Decimal::ZERO {
        for level in &book.asks {
            let mut order = TradingOrder {
                rate: level.0,
                amount: level.1,
                is_sell_order: true,
            };
            let mut last_level = false;

            // TODO: this compares the level price against a base-asset
            // quantity; check with the venue team whether the cap was
            // meant to use the level volume before touching it.
            if level.0 > internal_crypto_balance {
                order.amount = internal_crypto_balance;
                last_level = true;
            } else {
                internal_crypto_balance -= order.amount;
            }

            remaining -= order.amount * order.rate;
            if remaining < Decimal::ZERO {
                order.amount += div8(remaining, order.rate);
                last_level = true;
            }

            if order.amount > pair_min_amount {
                result.push(order);
            }
            if last_level {
                break;
            }
        }
    }

    let mut remaining = crypto_trading_limit;
    if remaining > Decimal::ZERO {
        for level in &book.bids {
            let mut order = TradingOrder {
                rate: level.0,
                amount: level.1,
                is_sell_order: false,
            };
            let mut last_level = false;

            if order.amount * order.rate > internal_crypto_balance {
                order.amount = internal_crypto_balance;
                last_level = true;
            } else {
                internal_crypto_balance -= order.amount;
            }

            if order.amount * order.rate > internal_usdc_balance {
                order.amount = div8(internal_usdc_balance, order.rate);
                last_level = true;
            } else {
                internal_usdc_balance -= order.amount * order.rate;
            }

            remaining -= order.amount;
            if remaining < Decimal::ZERO {
                order.amount += remaining;
                last_level = true;
            }

            if order.amount > pair_min_amount {
                result.push(order);
            }
            if last_level {
                break;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: &str, volume: &str) -> BookLevel {
        BookLevel(
            Decimal::from_str_exact(price).unwrap(),
            Decimal::from_str_exact(volume).unwrap(),
        )
    }

    fn book(asks: Vec<BookLevel>, bids: Vec<BookLevel>) -> OrderBook {
        OrderBook { asks, bids }
    }

    #[test]
    fn book_levels_parse_from_mixed_types() {
        let body = r#"{"asks":[["100.10", 1.0]], "bids":[["99.90", 0.5]]}"#;
        let book: OrderBook = serde_json::from_str(body).unwrap();
        assert_eq!(book.asks[0].0, dec!(100.10));
        assert_eq!(book.bids[0].1, dec!(0.5));
    }

    #[test]
    fn ask_below_min_amount_is_dropped() {
        let book = book(vec![level("100.00", "0.005"), level("100.10", "1.0")], vec![]);
        let orders = walk_book(&book, dec!(200), dec!(0), dec!(1000), dec!(0), dec!(0.01));

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].rate, dec!(100.10));
        assert_eq!(orders[0].amount, dec!(1.0));
        assert!(orders[0].is_sell_order);
    }

    #[test]
    fn zero_usdc_limit_emits_no_sell_side() {
        let book = book(vec![level("100.00", "1.0")], vec![]);
        let orders = walk_book(&book, dec!(0), dec!(0), dec!(1000), dec!(1000), dec!(0.01));
        assert!(orders.is_empty());
    }

    #[test]
    fn oversized_ask_truncates_to_spend_limit() {
        let book = book(vec![level("100", "5")], vec![]);
        let orders = walk_book(&book, dec!(200), dec!(0), dec!(1000), dec!(0), dec!(0.01));

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].amount, dec!(2));
        assert_eq!(orders[0].amount * orders[0].rate, dec!(200));
    }

    #[test]
    fn ask_walk_spend_stays_within_limit() {
        let book = book(
            vec![level("100", "1"), level("101", "1"), level("100", "1")],
            vec![],
        );
        let limit = dec!(250);
        let orders = walk_book(&book, limit, dec!(0), dec!(1000), dec!(0), dec!(0.01));

        let spent: Decimal = orders.iter().map(|o| o.amount * o.rate).sum();
        assert!(spent <= limit);
        assert_eq!(orders.len(), 3);
        // the last level absorbs the refund
        assert_eq!(orders[2].amount, dec!(0.49));
    }

    #[test]
    fn ask_price_above_crypto_balance_caps_the_level() {
        // price > balance triggers the cap even though the two are
        // different units; the walk keeps the venue's historical behavior
        let book = book(vec![level("100", "0.5")], vec![]);
        let orders = walk_book(&book, dec!(10000), dec!(0), dec!(2), dec!(0), dec!(0.01));

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].amount, dec!(2));
    }

    #[test]
    fn bid_walk_respects_crypto_limit() {
        let book = book(vec![], vec![level("99", "1.0")]);
        let orders = walk_book(&book, dec!(0), dec!(10), dec!(1000), dec!(100000), dec!(0.01));

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].rate, dec!(99));
        assert_eq!(orders[0].amount, dec!(1.0));
        assert!(!orders[0].is_sell_order);
    }

    #[test]
    fn bid_cost_above_usdc_balance_is_rescaled() {
        let book = book(vec![], vec![level("100", "2")]);
        let orders = walk_book(&book, dec!(0), dec!(10), dec!(1000), dec!(150), dec!(0.01));

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].amount, dec!(1.5));
    }

    #[test]
    fn bid_walk_total_stays_within_crypto_limit() {
        let book = book(
            vec![],
            vec![level("100", "2"), level("99", "2"), level("98", "2")],
        );
        let limit = dec!(5);
        let orders = walk_book(&book, dec!(0), limit, dec!(100000), dec!(100000), dec!(0.01));

        let total: Decimal = orders.iter().map(|o| o.amount).sum();
        assert!(total <= limit);
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[2].amount, dec!(1));
    }

    #[test]
    fn trade_error_classification() {
        assert_eq!(
            classify_trade_error("This market is frozen and orders cannot be placed"),
            TradeError::MarketFrozen
        );
        assert_eq!(
            classify_trade_error("This IP has been temporarily throttled."),
            TradeError::Throttled
        );
        assert_eq!(
            classify_trade_error("Unable to fill order completely."),
            TradeError::UnableToFill
        );
        assert_eq!(
            classify_trade_error("Not enough USDC."),
            TradeError::Other
        );
    }

    #[test]
    fn trade_response_parses_fill_and_rejection() {
        let filled = r#"{
            "orderNumber": "31226040",
            "resultingTrades": [
                {"amount": "0.1", "rate": "100.0", "takerAdjustment": "0.0997", "total": "10.0", "tradeID": "1", "type": "buy", "date": "2020-01-01 00:00:00"},
                {"amount": "0.2", "rate": "100.1", "takerAdjustment": "0.1994", "total": "20.0", "tradeID": "2", "type": "buy", "date": "2020-01-01 00:00:01"}
            ]
        }"#;
        match serde_json::from_str::<TradeResponse>(filled).unwrap() {
            TradeResponse::Filled {
                resulting_trades, ..
            } => {
                let total: Decimal = resulting_trades.iter().map(|t| t.taker_adjustment).sum();
                assert_eq!(total, dec!(0.2991));
            }
            other => panic!("expected fill, got {other:?}"),
        }

        let rejected = r#"{"error": "Unable to fill order completely."}"#;
        match serde_json::from_str::<TradeResponse>(rejected).unwrap() {
            TradeResponse::Rejected { error } => {
                assert_eq!(classify_trade_error(&error), TradeError::UnableToFill);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn nonces_are_strictly_increasing() {
        let client = PoloniexClient::new(&crate::config::TradingSettings {
            url: "https://example.com".to_string(),
            key: String::new(),
            secret: String::new(),
            pair: "USDC_BTC".to_string(),
            currency: "BTC".to_string(),
            crypto_address: String::new(),
            destination_tag: String::new(),
            withdrawal_network: String::new(),
            usdc_usage_limit: Decimal::ONE,
        })
        .unwrap();

        let first = client.next_nonce();
        let second = client.next_nonce();
        let third = client.next_nonce();
        assert!(second > first);
        assert!(third > second);
    }
}
