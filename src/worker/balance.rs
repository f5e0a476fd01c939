//! Inventory rebalancing control loop.
//!
//! One worker per configured currency. Every tick it reads both venues'
//! balances and, when the split has drifted outside the configured band,
//! moves the difference on-chain in the direction that restores the
//! target allocation. Missing deposit addresses are resolved lazily on
//! the first tick and are fatal when the venues cannot provide them.

use std::time::Duration;

use anyhow::anyhow;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::CryptoCurrency;
use crate::utils::decimal::round_down8;
use crate::venue::{InternalVenue, TradingVenue};

const TICK: Duration = Duration::from_secs(10);

/// Per-currency rebalancer over one kiosk adapter and one exchange
/// adapter, both owned exclusively by this worker.
pub struct BalanceWorker<I, T> {
    settings: CryptoCurrency,
    internal: I,
    trading: T,
    notify: mpsc::Sender<anyhow::Error>,
}

impl<I: InternalVenue, T: TradingVenue> BalanceWorker<I, T> {
    pub fn new(
        settings: CryptoCurrency,
        internal: I,
        trading: T,
        notify: mpsc::Sender<anyhow::Error>,
    ) -> Self {
        Self {
            settings,
            internal,
            trading,
            notify,
        }
    }

    /// Tick every 10 seconds until cancellation or a fatal error.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(
                        currency = %self.settings.internal_settings.currency,
                        "balancer: cancelled"
                    );
                    return;
                }
                _ = tokio::time::sleep(TICK) => {}
            }

            if let Err(err) = self.tick().await {
                error!(
                    currency = %self.settings.internal_settings.currency,
                    error = %err,
                    "balancer: stopping on fatal error"
                );
                let _ = self.notify.send(err).await;
                return;
            }
        }
    }

    /// One balancing pass. `Err` is fatal for the worker; transient
    /// venue failures log and return `Ok` so the next tick retries.
    async fn tick(&mut self) -> anyhow::Result<()> {
        self.resolve_addresses().await?;

        let internal_balances = self.internal.get_balances().await;
        if internal_balances.is_empty() {
            error!("balancer: can't get internal balances");
            return Ok(());
        }
        let Some(internal_entry) =
            internal_balances.get(&self.settings.internal_settings.currency)
        else {
            error!(
                currency = %self.settings.internal_settings.currency,
                "balancer: no internal balance entry"
            );
            return Ok(());
        };
        // reserved amounts back resting mirror orders and still belong
        // to the operator's inventory
        let internal_balance = internal_entry.balance + internal_entry.reserved;

        let trading_balances = self.trading.get_trading_balances().await;
        if trading_balances.is_empty() {
            error!("balancer: can't get trading venue balances");
            return Ok(());
        }
        let Some(trading_entry) = trading_balances.get(&self.settings.trading_settings.currency)
        else {
            error!(
                currency = %self.settings.trading_settings.currency,
                "balancer: no trading venue balance entry"
            );
            return Ok(());
        };
        let trading_balance = trading_entry.balance;

        debug!(
            currency = %self.settings.trading_settings.currency,
            trading = %trading_balance,
            internal = %internal_balance,
            "balancer: observed balances"
        );

        let total = round_down8(trading_balance + internal_balance);
        let diff_abs = round_down8(
            (trading_balance - total * (Decimal::ONE - self.settings.balance_percent)).abs(),
        );
        let lower = round_down8(
            total
                * (Decimal::ONE
                    - (self.settings.balance_percent - self.settings.threshold_percent)),
        );
        let upper = round_down8(
            total * (self.settings.balance_percent + self.settings.threshold_percent),
        );

        self.transfer_logic(
            diff_abs,
            self.settings.threshold_abs,
            trading_balance,
            lower,
            internal_balance,
            upper,
        )
        .await;

        Ok(())
    }

    /// Memoize both deposit addresses, exchange side first. A venue that
    /// cannot produce its address makes rebalancing impossible, so the
    /// error is fatal.
    async fn resolve_addresses(&mut self) -> anyhow::Result<()> {
        if self.settings.trading_settings.crypto_address.is_empty() {
            let address = self
                .trading
                .get_crypto_address(
                    &self.settings.trading_settings.currency,
                    &self.settings.trading_settings.withdrawal_network,
                )
                .await;
            if address.is_empty() {
                return Err(anyhow!(
                    "balancer {}: can't get trading venue deposit address",
                    self.settings.trading_settings.currency
                ));
            }
            self.settings.trading_settings.crypto_address = address;
        }

        if self.settings.internal_settings.crypto_address.is_empty() {
            let address = self
                .internal
                .get_crypto_address(&self.settings.internal_settings.currency)
                .await;
            if address.is_empty() {
                return Err(anyhow!(
                    "balancer {}: can't get internal deposit address",
                    self.settings.internal_settings.currency
                ));
            }
            self.settings.internal_settings.crypto_address = address;
        }

        Ok(())
    }

    /// Decide whether this tick rebalances, pick the direction and submit
    /// the withdrawal. Returns whether a transfer was submitted
    /// successfully.
    async fn transfer_logic(
        &self,
        diff_abs: Decimal,
        threshold_abs: Decimal,
        trading_balance: Decimal,
        lower: Decimal,
        internal_balance: Decimal,
        upper: Decimal,
    ) -> bool {
        let triggered =
            diff_abs > threshold_abs && (trading_balance > lower || internal_balance > upper);
        if !triggered {
            return false;
        }

        info!(
            currency = %self.settings.internal_settings.currency,
            trading = %trading_balance,
            internal = %internal_balance,
            "balancer: allocation drifted outside band"
        );

        let amount = diff_abs;
        if internal_balance > upper {
            info!(
                currency = %self.settings.internal_settings.currency,
                %diff_abs,
                %threshold_abs,
                %internal_balance,
                %upper,
                "balancer: internal side above upper bound"
            );
            info!(
                currency = %self.settings.internal_settings.currency,
                %amount,
                "balancer: creating withdrawal internal -> trading venue"
            );
            let payment_id = self
                .internal
                .withdraw(
                    &self.settings.trading_settings.crypto_address,
                    &self.settings.trading_settings.destination_tag,
                    amount,
                    self.settings.currency_id,
                )
                .await;
            info!(
                currency = %self.settings.internal_settings.currency,
                %amount,
                payment_id = ?payment_id,
                "balancer: withdrawal internal -> trading venue submitted"
            );
            payment_id.is_some()
        } else {
            info!(
                currency = %self.settings.trading_settings.currency,
                %diff_abs,
                %threshold_abs,
                %trading_balance,
                %lower,
                "balancer: trading side above lower bound"
            );
            info!(
                currency = %self.settings.trading_settings.currency,
                %amount,
                "balancer: creating withdrawal trading venue -> internal"
            );
            let success = self
                .trading
                .withdraw(
                    &self.settings.internal_settings.crypto_address,
                    amount,
                    &self.settings.trading_settings.currency,
                    &self.settings.trading_settings.withdrawal_network,
                )
                .await;
            info!(
                currency = %self.settings.trading_settings.currency,
                %amount,
                result = success,
                "balancer: withdrawal trading venue -> internal submitted"
            );
            success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InternalSettings, TradingSettings};
    use crate::venue::mock::{MockInternalVenue, MockTradingVenue};
    use rust_decimal_macros::dec;

    fn settings() -> CryptoCurrency {
        CryptoCurrency {
            currency_id: 2001,
            balance_percent: dec!(0.8),
            threshold_percent: dec!(0.1),
            threshold_abs: dec!(0.2),
            sell_multiplier: dec!(1.005),
            buy_multiplier: dec!(0.995),
            timeout_minutes: 60,
            internal_settings: InternalSettings {
                url: String::new(),
                key: String::new(),
                secret: String::new(),
                pair: "BTC,USDC".to_string(),
                currency: "BTC".to_string(),
                crypto_address: "internal-address".to_string(),
                usdc_usage_limit: dec!(0.4),
            },
            trading_settings: TradingSettings {
                url: "https://poloniex.com".to_string(),
                key: String::new(),
                secret: String::new(),
                pair: "USDC_BTC".to_string(),
                currency: "BTC".to_string(),
                crypto_address: "trading-address".to_string(),
                destination_tag: "777".to_string(),
                withdrawal_network: String::new(),
                usdc_usage_limit: dec!(0.8),
            },
        }
    }

    fn worker() -> BalanceWorker<MockInternalVenue, MockTradingVenue> {
        let (notify, _rx) = mpsc::channel(1);
        BalanceWorker::new(
            settings(),
            MockInternalVenue::default(),
            MockTradingVenue::default(),
            notify,
        )
    }

    #[tokio::test]
    async fn trading_side_withdrawal_succeeds() {
        let worker = worker();

        let submitted = worker
            .transfer_logic(dec!(100), dec!(1), dec!(100), dec!(90), dec!(100), dec!(110))
            .await;

        assert!(submitted);
        assert_eq!(worker.trading.withdrawals.lock().unwrap().len(), 1);
        assert!(worker.internal.withdrawals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn internal_side_withdrawal_succeeds() {
        let worker = worker();

        let submitted = worker
            .transfer_logic(dec!(100), dec!(1), dec!(100), dec!(80), dec!(100), dec!(90))
            .await;

        assert!(submitted);
        assert_eq!(worker.internal.withdrawals.lock().unwrap().len(), 1);
        assert!(worker.trading.withdrawals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn drift_equal_to_threshold_does_not_trigger() {
        let worker = worker();

        let submitted = worker
            .transfer_logic(dec!(0.2), dec!(0.2), dec!(100), dec!(30), dec!(100), dec!(90))
            .await;

        assert!(!submitted);
        assert!(worker.internal.withdrawals.lock().unwrap().is_empty());
        assert!(worker.trading.withdrawals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn balances_inside_band_do_not_trigger() {
        let worker = worker();

        // large drift but both balances inside the band
        let submitted = worker
            .transfer_logic(dec!(50), dec!(0.2), dec!(20), dec!(30), dec!(80), dec!(90))
            .await;

        assert!(!submitted);
        assert!(worker.trading.withdrawals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tick_rebalances_trading_to_internal() {
        let mut worker = worker();
        worker.internal.set_balance("BTC", dec!(20), dec!(0));
        worker.trading.set_balance("BTC", dec!(80));

        worker.tick().await.unwrap();

        // total 100, target on exchange misses by 60, internal side is
        // below the upper bound: inventory flows back to the kiosk
        let withdrawals = worker.trading.withdrawals.lock().unwrap();
        assert_eq!(withdrawals.len(), 1);
        assert_eq!(withdrawals[0].amount, dec!(60));
        assert_eq!(withdrawals[0].address, "internal-address");
        assert_eq!(withdrawals[0].currency, "BTC");
        assert!(worker.internal.withdrawals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tick_rebalances_internal_to_trading() {
        let mut worker = worker();
        worker.internal.set_balance("BTC", dec!(90), dec!(5));
        worker.trading.set_balance("BTC", dec!(5));

        worker.tick().await.unwrap();

        let withdrawals = worker.internal.withdrawals.lock().unwrap();
        assert_eq!(withdrawals.len(), 1);
        assert_eq!(withdrawals[0].amount, dec!(15));
        assert_eq!(withdrawals[0].address, "trading-address");
        assert_eq!(withdrawals[0].destination_tag, "777");
        assert_eq!(withdrawals[0].currency_id, 2001);
        assert!(worker.trading.withdrawals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_balance_entry_skips_the_tick() {
        let mut worker = worker();
        worker.internal.set_balance("ETH", dec!(10), dec!(0));
        worker.trading.set_balance("BTC", dec!(80));

        worker.tick().await.unwrap();

        assert!(worker.internal.withdrawals.lock().unwrap().is_empty());
        assert!(worker.trading.withdrawals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_trading_address_is_fatal() {
        let mut worker = worker();
        worker.settings.trading_settings.crypto_address = String::new();
        worker.trading.crypto_address.lock().unwrap().clear();

        assert!(worker.tick().await.is_err());
    }

    #[tokio::test]
    async fn addresses_are_memoized_once_resolved() {
        let mut worker = worker();
        worker.settings.trading_settings.crypto_address = String::new();
        worker.settings.internal_settings.crypto_address = String::new();
        worker.internal.set_balance("BTC", dec!(20), dec!(0));
        worker.trading.set_balance("BTC", dec!(80));

        worker.tick().await.unwrap();

        assert_eq!(worker.settings.trading_settings.crypto_address, "trading-address");
        assert_eq!(worker.settings.internal_settings.crypto_address, "internal-address");
    }
}
