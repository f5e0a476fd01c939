//! Book-mirroring control loop.
//!
//! One worker per configured currency. Every tick it cancels the mirror
//! orders it published on the kiosk, hedges whatever the kiosk customers
//! filled in the meantime on the exchange, and republishes a fresh mirror
//! of the exchange book with the configured margin multipliers. State is
//! re-derived from observed venue state each tick; the in-memory pair
//! cache is advisory and lives for exactly one cycle.

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::CryptoCurrency;
use crate::utils::decimal::round_down8;
use crate::venue::{InternalOrder, InternalVenue, TradingOrder, TradingVenue};

const TICK: Duration = Duration::from_secs(10);
const USDC: &str = "USDC";

/// Mirror relationship between one order resting on the kiosk and the
/// hedge that will be placed on the exchange once the kiosk side fills.
#[derive(Debug, Clone)]
pub struct OrderPair {
    pub internal_id: Uuid,
    pub internal_amount: Decimal,
    pub internal_price: Decimal,
    pub trading_amount: Decimal,
    pub trading_price: Decimal,
    pub is_sell_order: bool,
}

/// Per-currency market mirrorer over one kiosk adapter and one exchange
/// adapter, both owned exclusively by this worker.
pub struct TradingWorker<I, T> {
    settings: CryptoCurrency,
    internal: I,
    trading: T,
    cache: HashMap<Uuid, OrderPair>,
    pair_min_amount: Decimal,
}

impl<I: InternalVenue, T: TradingVenue> TradingWorker<I, T> {
    pub fn new(settings: CryptoCurrency, internal: I, trading: T) -> Self {
        Self {
            settings,
            internal,
            trading,
            cache: HashMap::new(),
            pair_min_amount: Decimal::ZERO,
        }
    }

    /// Tick every 10 seconds until cancellation. The pair minimum is
    /// resolved once up front; a zero minimum only means no levels get
    /// dropped for size.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.pair_min_amount = self
            .internal
            .get_trading_pair_info(&self.settings.internal_settings.pair)
            .await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(
                        currency = %self.settings.internal_settings.currency,
                        "trading worker: cancelled"
                    );
                    return;
                }
                _ = tokio::time::sleep(TICK) => {}
            }

            self.tick().await;
        }
    }

    /// One mirroring pass; every failure is soft and heals next tick.
    async fn tick(&mut self) {
        let trading_balances = self.trading.get_trading_balances().await;
        if trading_balances.is_empty() {
            error!("trading worker: can't get trading venue balances");
            return;
        }

        let internal_balances = self.internal.get_balances().await;
        if internal_balances.is_empty() {
            error!("trading worker: can't get internal balances");
            return;
        }

        // After a restart (or an abandoned reconciliation) the cache is
        // rebuilt from whatever is actually resting on the kiosk.
        if self.cache.is_empty() {
            let live_orders = self
                .internal
                .get_orders(&self.settings.internal_settings.pair)
                .await;
            if live_orders.is_empty() {
                error!("trading worker: can't get internal orders");
                return;
            }
            self.seed_cache(live_orders);
        }

        if self.remove_old_orders().await {
            // reconciliation failed; keep the cache so the next tick
            // retries the same pairs
            return;
        }

        self.cache.clear();

        let Some(internal_balance) = internal_balances
            .get(&self.settings.internal_settings.currency)
            .map(|entry| entry.balance)
        else {
            error!(
                currency = %self.settings.internal_settings.currency,
                "trading worker: no internal balance entry"
            );
            return;
        };
        let Some(internal_usdc_balance) = internal_balances.get(USDC).map(|entry| {
            round_down8(entry.balance * self.settings.internal_settings.usdc_usage_limit)
        }) else {
            error!("trading worker: no internal USDC balance entry");
            return;
        };
        let Some(crypto_trading_limit) = trading_balances
            .get(&self.settings.trading_settings.currency)
            .map(|entry| entry.balance)
        else {
            error!(
                currency = %self.settings.trading_settings.currency,
                "trading worker: no trading venue balance entry"
            );
            return;
        };
        let Some(usdc_trading_limit) = trading_balances.get(USDC).map(|entry| {
            round_down8(entry.balance * self.settings.trading_settings.usdc_usage_limit)
        }) else {
            error!("trading worker: no trading venue USDC balance entry");
            return;
        };

        let trading_orders = self
            .trading
            .get_public_trading_orders(
                &self.settings.trading_settings.pair,
                usdc_trading_limit,
                crypto_trading_limit,
                internal_balance,
                internal_usdc_balance,
                self.pair_min_amount,
            )
            .await;
        if trading_orders.is_empty() {
            error!(
                currency = %self.settings.internal_settings.currency,
                "trading worker: empty order book response"
            );
        }

        for order in &trading_orders {
            if !self.add_new_order_pair(order).await {
                error!(
                    currency = %self.settings.internal_settings.currency,
                    rate = %order.rate,
                    amount = %order.amount,
                    "trading worker: failed to mirror order"
                );
            }
        }
    }

    /// Rebuild pairs from the kiosk's live orders. The hedge leg is
    /// priced back through the opposite multiplier, undoing the margin
    /// the mirror originally applied.
    fn seed_cache(&mut self, live_orders: HashMap<Uuid, InternalOrder>) {
        for (id, order) in live_orders {
            let trading_price = if order.is_sell_order {
                round_down8(order.price * self.settings.buy_multiplier)
            } else {
                round_down8(order.price * self.settings.sell_multiplier)
            };

            self.cache.insert(
                id,
                OrderPair {
                    internal_id: order.id,
                    internal_amount: order.initial_amount,
                    internal_price: order.price,
                    trading_amount: order.initial_amount,
                    trading_price,
                    is_sell_order: order.is_sell_order,
                },
            );
        }
    }

    /// Cancel every cached mirror order and hedge filled amounts on the
    /// exchange. Returns true when a pair could neither be removed nor
    /// explained by completed fills; the tick must then stop without
    /// re-mirroring.
    async fn remove_old_orders(&self) -> bool {
        let Some((currency_from, currency_to)) =
            self.settings.internal_settings.pair.split_once(',')
        else {
            error!(
                pair = %self.settings.internal_settings.pair,
                "trading worker: malformed internal pair"
            );
            return true;
        };

        for (id, pair) in &self.cache {
            if self
                .internal
                .remove_order(*id, currency_from, currency_to)
                .await
            {
                continue;
            }

            let completed = self
                .internal
                .get_completed_order(*id, &self.settings.internal_settings.pair)
                .await;
            if completed.is_empty() {
                error!(
                    order_id = %id,
                    "trading worker: can't cancel internal order"
                );
                return true;
            }

            let completed_amount: Decimal =
                completed.iter().map(|order| order.initial_amount).sum();

            info!(
                pair = %self.settings.internal_settings.pair,
                amount = %completed_amount,
                price = %pair.trading_price,
                "trading worker: hedging filled amount on trading venue"
            );
            let hedged = if pair.is_sell_order {
                self.trading
                    .buy(
                        &self.settings.trading_settings.pair,
                        pair.trading_price,
                        pair.internal_price,
                        completed_amount,
                        &self.settings.internal_settings.pair,
                    )
                    .await
            } else {
                self.trading
                    .sell(
                        &self.settings.trading_settings.pair,
                        pair.trading_price,
                        pair.internal_price,
                        completed_amount,
                        &self.settings.internal_settings.pair,
                    )
                    .await
            };
            info!(
                pair = %self.settings.internal_settings.pair,
                amount = %completed_amount,
                price = %pair.trading_price,
                result = hedged,
                "trading worker: hedge order placed"
            );
        }

        false
    }

    /// Publish one exchange level on the kiosk with the margin applied
    /// and remember the pair under the venue-assigned id.
    async fn add_new_order_pair(&mut self, order: &TradingOrder) -> bool {
        let internal_price = if order.is_sell_order {
            round_down8(order.rate * self.settings.sell_multiplier)
        } else {
            round_down8(order.rate * self.settings.buy_multiplier)
        };

        let Some((currency_from, currency_to)) =
            self.settings.internal_settings.pair.split_once(',')
        else {
            error!(
                pair = %self.settings.internal_settings.pair,
                "trading worker: malformed internal pair"
            );
            return false;
        };

        let Some(id) = self
            .internal
            .add_order(
                currency_from,
                currency_to,
                order.amount,
                internal_price,
                order.is_sell_order,
            )
            .await
        else {
            return false;
        };

        self.cache.insert(
            id,
            OrderPair {
                internal_id: id,
                internal_amount: order.amount,
                internal_price,
                trading_amount: order.amount,
                trading_price: order.rate,
                is_sell_order: order.is_sell_order,
            },
        );

        true
    }
}
