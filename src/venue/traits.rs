//! Capability contracts for the two venue adapters.
//!
//! The workers are generic over these traits: production wires in the
//! HTTP adapters, tests inject the fakes from [`crate::venue::mock`].
//! Every operation fails soft: transport and venue errors are logged by
//! the implementation and surface to the caller as an empty, `None` or
//! `false` value; a single failed tick heals on the next one.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use super::types::{Balance, InternalOrder, TradingOrder};

/// Operations the bot needs from the kiosk backend.
#[async_trait]
pub trait InternalVenue: Send + Sync {
    /// Live orders on `pair`, keyed by order id.
    async fn get_orders(&self, pair: &str) -> HashMap<Uuid, InternalOrder>;

    async fn get_order(&self, order_id: Uuid, pair: &str) -> Option<InternalOrder>;

    /// Fills that closed `order_id`; empty when nothing completed (or on
    /// failure, the two are indistinguishable at the wire).
    async fn get_completed_order(&self, order_id: Uuid, pair: &str) -> Vec<InternalOrder>;

    /// Whether a previously submitted withdrawal reached a final status.
    async fn is_payment_completed(&self, payment_id: i64) -> bool;

    async fn get_balances(&self) -> HashMap<String, Balance>;

    /// Minimum order amount for `pair`; zero when the venue cannot say.
    async fn get_trading_pair_info(&self, pair: &str) -> Decimal;

    /// Deposit address for `currency`; empty on failure.
    async fn get_crypto_address(&self, currency: &str) -> String;

    /// On-chain withdrawal; the created payment id, `None` on failure.
    async fn withdraw(
        &self,
        address: &str,
        destination_tag: &str,
        amount: Decimal,
        currency_id: i32,
    ) -> Option<i64>;

    async fn remove_order(&self, order_id: Uuid, currency_from: &str, currency_to: &str) -> bool;

    /// Place a limit order; the venue-assigned id, `None` on failure.
    async fn add_order(
        &self,
        currency_from: &str,
        currency_to: &str,
        amount: Decimal,
        price: Decimal,
        is_sell_order: bool,
    ) -> Option<Uuid>;
}

/// Operations the bot needs from the public exchange.
#[async_trait]
pub trait TradingVenue: Send + Sync {
    /// Free balances by currency. Implementations may serve a short-lived
    /// cache; the owning worker is the only writer.
    async fn get_trading_balances(&self) -> HashMap<String, Balance>;

    /// Walk the public book and consolidate its top levels against the
    /// operator spend limits and the kiosk-side inventory.
    #[allow(clippy::too_many_arguments)]
    async fn get_public_trading_orders(
        &self,
        pair: &str,
        usdc_trading_limit: Decimal,
        crypto_trading_limit: Decimal,
        internal_crypto_balance: Decimal,
        internal_usdc_balance: Decimal,
        pair_min_amount: Decimal,
    ) -> Vec<TradingOrder>;

    /// Fill-or-kill limit buy with the price walked up toward
    /// `internal_price`. True only when the whole required amount filled.
    async fn buy(
        &self,
        pair: &str,
        trading_price: Decimal,
        internal_price: Decimal,
        amount: Decimal,
        internal_pair: &str,
    ) -> bool;

    /// Fill-or-kill limit sell with the price walked down toward
    /// `internal_price`.
    async fn sell(
        &self,
        pair: &str,
        trading_price: Decimal,
        internal_price: Decimal,
        amount: Decimal,
        internal_pair: &str,
    ) -> bool;

    async fn withdraw(
        &self,
        address: &str,
        amount: Decimal,
        currency: &str,
        withdrawal_network: &str,
    ) -> bool;

    /// Deposit address for `currency`; `withdrawal_network`, when set,
    /// replaces the currency as the lookup key. Empty on failure.
    async fn get_crypto_address(&self, currency: &str, withdrawal_network: &str) -> String;
}
