//! Kiosk backend REST adapter.
//!
//! Every request is signed with HMAC-SHA-512 over the full request URL
//! (query string included); the hex signature travels in a `Sign` header
//! next to the public key in `Key`. POST requests carry the encoded query
//! string as their body with an `application/json` content type, a venue
//! quirk the server side expects.
//!
//! All operations fail soft: transport errors, non-200 statuses (503 is
//! the venue's habitual "try later") and malformed bodies are logged and
//! surface as empty values.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::config::InternalSettings;
use crate::utils::signing::hmac_sha512_hex;

use super::traits::InternalVenue;
use super::types::{Balance, InternalOrder};

enum Method {
    Get,
    Post,
}

/// Typed client for the kiosk backend.
pub struct KioskClient {
    http: Client,
    base_url: String,
    public_key: String,
    secret_key: String,
}

impl KioskClient {
    pub fn new(settings: &InternalSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.url.trim_end_matches('/').to_string(),
            public_key: settings.key.clone(),
            secret_key: settings.secret.clone(),
        })
    }

    /// Signed request; `None` on any transport or status failure.
    async fn query(
        &self,
        endpoint: &str,
        method: Method,
        params: &BTreeMap<&str, String>,
    ) -> Option<String> {
        let query = encode_query(params);
        let url = format!("{}/{}?{}", self.base_url, endpoint, query);
        let signature = hmac_sha512_hex(self.secret_key.as_bytes(), url.as_bytes());

        let request = match method {
            Method::Get => self
                .http
                .get(&url)
                .header("Content-Type", "application/x-www-form-urlencoded"),
            Method::Post => self
                .http
                .post(&url)
                .header("Content-Type", "application/json")
                .body(query),
        };

        let response = request
            .header("Key", &self.public_key)
            .header("Sign", &signature)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                error!(endpoint, error = %err, "kiosk: request failed");
                return None;
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            error!(endpoint, "kiosk: service unavailable");
            return None;
        }
        if status != StatusCode::OK {
            error!(endpoint, status = %status, body = %body, "kiosk: non-200 response");
            return None;
        }
        if body.is_empty() {
            return None;
        }
        Some(body)
    }

    fn parse<T: DeserializeOwned>(&self, endpoint: &str, body: &str) -> Option<T> {
        match serde_json::from_str(body) {
            Ok(value) => Some(value),
            Err(err) => {
                error!(endpoint, error = %err, "kiosk: malformed response");
                None
            }
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &BTreeMap<&str, String>,
    ) -> Option<T> {
        let body = self.query(endpoint, Method::Get, params).await?;
        self.parse(endpoint, &body)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &BTreeMap<&str, String>,
    ) -> Option<T> {
        let body = self.query(endpoint, Method::Post, params).await?;
        self.parse(endpoint, &body)
    }
}

/// Percent-encode `params` in ascending key order so the signature is
/// stable for a given parameter set.
fn encode_query(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

#[derive(Deserialize)]
struct ErrorCoded {
    #[serde(rename = "errorCode")]
    error_code: i32,
}

#[derive(Deserialize)]
struct TradePlaced {
    #[serde(default)]
    id: String,
    #[serde(rename = "errorCode")]
    error_code: i32,
}

#[derive(Deserialize)]
struct PairInfo {
    #[serde(rename = "minAmount")]
    min_amount: Decimal,
}

#[derive(Deserialize)]
struct AddressInfo {
    #[serde(rename = "cryptoAddress")]
    crypto_address: String,
}

#[derive(Deserialize)]
struct PaymentCreated {
    id: Option<i64>,
}

#[derive(Deserialize)]
struct PaymentStatus {
    #[serde(rename = "statusId")]
    status_id: i32,
}

#[async_trait]
impl InternalVenue for KioskClient {
    async fn get_orders(&self, pair: &str) -> HashMap<Uuid, InternalOrder> {
        let mut params = BTreeMap::new();
        params.insert("tradingPair", pair.to_string());

        let orders: Option<Vec<InternalOrder>> =
            self.get("api/Trading/ActiveOrders", &params).await;

        orders
            .unwrap_or_default()
            .into_iter()
            .map(|order| (order.id, order))
            .collect()
    }

    async fn get_order(&self, order_id: Uuid, pair: &str) -> Option<InternalOrder> {
        let mut params = BTreeMap::new();
        params.insert("tradingPair", pair.to_string());
        params.insert("orderId", order_id.to_string());

        self.get("api/Trading/OrderInfo", &params).await
    }

    async fn get_completed_order(&self, order_id: Uuid, pair: &str) -> Vec<InternalOrder> {
        let mut params = BTreeMap::new();
        params.insert("tradingPair", pair.to_string());
        params.insert("orderId", order_id.to_string());

        let orders: Option<Vec<InternalOrder>> =
            self.get("api/Trading/CompletedOrderInfo", &params).await;
        orders.unwrap_or_default()
    }

    async fn is_payment_completed(&self, payment_id: i64) -> bool {
        let mut params = BTreeMap::new();
        params.insert("orderId", payment_id.to_string());

        let status: Option<PaymentStatus> = self.get("api/Payment", &params).await;
        status.map_or(false, |payment| payment.status_id >= 2)
    }

    async fn get_balances(&self) -> HashMap<String, Balance> {
        let mut params = BTreeMap::new();
        params.insert("page", "1".to_string());
        params.insert("itemsPerPage", "1000".to_string());

        let balances: Option<Vec<Balance>> = self.get("api/Device/UserAccount", &params).await;

        balances
            .unwrap_or_default()
            .into_iter()
            .map(|balance| (balance.currency.clone(), balance))
            .collect()
    }

    async fn get_trading_pair_info(&self, pair: &str) -> Decimal {
        let mut params = BTreeMap::new();
        params.insert("tradingPair", pair.to_string());

        let info: Option<PairInfo> = self.get("api/Trading/Info", &params).await;
        info.map_or(Decimal::ZERO, |info| info.min_amount)
    }

    async fn get_crypto_address(&self, currency: &str) -> String {
        let mut params = BTreeMap::new();
        params.insert("currencyName", currency.to_string());

        let info: Option<AddressInfo> =
            self.get("api/UserAccount/getCryptoAddress", &params).await;
        info.map_or_else(String::new, |info| info.crypto_address)
    }

    async fn withdraw(
        &self,
        address: &str,
        destination_tag: &str,
        amount: Decimal,
        currency_id: i32,
    ) -> Option<i64> {
        let inner = serde_json::json!({
            "address": address,
            "destinationTag": destination_tag,
        });

        let mut params = BTreeMap::new();
        params.insert("params", inner.to_string());
        params.insert("currencyId", currency_id.to_string());
        params.insert("amount", amount.to_string());
        params.insert("withdrawalAmount", amount.to_string());
        params.insert("withdrawalCurrencyId", currency_id.to_string());
        params.insert("fee", "0".to_string());
        params.insert("uuId", Uuid::new_v4().to_string());
        params.insert("moneySource", "0".to_string());
        params.insert("moneySourceId", "0".to_string());
        if !destination_tag.is_empty() {
            params.insert("destinationTag", destination_tag.to_string());
        }

        let created: Option<PaymentCreated> = self.post("api/Payment", &params).await;
        created.and_then(|payment| payment.id)
    }

    async fn remove_order(&self, order_id: Uuid, currency_from: &str, currency_to: &str) -> bool {
        let mut params = BTreeMap::new();
        params.insert("id", order_id.to_string());
        params.insert("currencyFrom", currency_from.to_string());
        params.insert("currencyTo", currency_to.to_string());

        let result: Option<ErrorCoded> = self.post("api/Trading/RemoveOrder", &params).await;
        result.map_or(false, |result| result.error_code == 0)
    }

    async fn add_order(
        &self,
        currency_from: &str,
        currency_to: &str,
        amount: Decimal,
        price: Decimal,
        is_sell_order: bool,
    ) -> Option<Uuid> {
        let mut params = BTreeMap::new();
        params.insert("currencyFrom", currency_from.to_string());
        params.insert("currencyTo", currency_to.to_string());
        params.insert("amount", amount.to_string());
        params.insert("price", price.to_string());
        params.insert("isSellOrder", is_sell_order.to_string());

        let placed: Option<TradePlaced> = self.post("api/Trading/Trade", &params).await;
        let placed = placed?;
        if placed.error_code != 0 {
            error!(
                code = placed.error_code,
                currency = currency_from,
                "kiosk: trade rejected"
            );
            return None;
        }

        match Uuid::parse_str(&placed.id) {
            Ok(id) => Some(id),
            Err(err) => {
                error!(id = %placed.id, error = %err, "kiosk: unparseable order id");
                None
            }
        }
    }
}
