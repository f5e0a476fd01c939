//! In-memory venue fakes for worker tests.
//!
//! State lives in plain mutexes and is set directly by the test; every
//! mutating call is recorded so tests can assert on what the workers
//! actually submitted.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::traits::{InternalVenue, TradingVenue};
use super::types::{Balance, InternalOrder, TradingOrder};

/// One `add_order` call as the kiosk fake observed it.
#[derive(Debug, Clone)]
pub struct AddedOrder {
    pub currency_from: String,
    pub currency_to: String,
    pub amount: Decimal,
    pub price: Decimal,
    pub is_sell_order: bool,
    pub assigned_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct InternalWithdrawal {
    pub address: String,
    pub destination_tag: String,
    pub amount: Decimal,
    pub currency_id: i32,
}

#[derive(Debug, Clone)]
pub struct TradingWithdrawal {
    pub address: String,
    pub amount: Decimal,
    pub currency: String,
    pub withdrawal_network: String,
}

/// One `buy` or `sell` call as the exchange fake observed it.
#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub pair: String,
    pub trading_price: Decimal,
    pub internal_price: Decimal,
    pub amount: Decimal,
    pub internal_pair: String,
}

/// Kiosk fake.
pub struct MockInternalVenue {
    pub orders: Mutex<HashMap<Uuid, InternalOrder>>,
    pub completed: Mutex<HashMap<Uuid, Vec<InternalOrder>>>,
    pub balances: Mutex<HashMap<String, Balance>>,
    pub pair_min_amount: Mutex<Decimal>,
    pub crypto_address: Mutex<String>,
    /// Result every `remove_order` call reports.
    pub removable: Mutex<bool>,
    /// Payment id `withdraw` hands back; `None` simulates failure.
    pub withdraw_payment_id: Mutex<Option<i64>>,
    /// When false, `add_order` reports failure.
    pub accept_orders: Mutex<bool>,
    pub completed_payments: Mutex<Vec<i64>>,
    pub added_orders: Mutex<Vec<AddedOrder>>,
    pub withdrawals: Mutex<Vec<InternalWithdrawal>>,
}

impl Default for MockInternalVenue {
    fn default() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            pair_min_amount: Mutex::new(Decimal::ZERO),
            crypto_address: Mutex::new("internal-address".to_string()),
            removable: Mutex::new(true),
            withdraw_payment_id: Mutex::new(Some(1)),
            accept_orders: Mutex::new(true),
            completed_payments: Mutex::new(Vec::new()),
            added_orders: Mutex::new(Vec::new()),
            withdrawals: Mutex::new(Vec::new()),
        }
    }
}

impl MockInternalVenue {
    pub fn set_balance(&self, currency: &str, balance: Decimal, reserved: Decimal) {
        self.balances.lock().unwrap().insert(
            currency.to_string(),
            Balance {
                currency: currency.to_string(),
                balance,
                reserved,
            },
        );
    }
}

#[async_trait]
impl InternalVenue for MockInternalVenue {
    async fn get_orders(&self, _pair: &str) -> HashMap<Uuid, InternalOrder> {
        self.orders.lock().unwrap().clone()
    }

    async fn get_order(&self, order_id: Uuid, _pair: &str) -> Option<InternalOrder> {
        self.orders.lock().unwrap().get(&order_id).cloned()
    }

    async fn get_completed_order(&self, order_id: Uuid, _pair: &str) -> Vec<InternalOrder> {
        self.completed
            .lock()
            .unwrap()
            .get(&order_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn is_payment_completed(&self, payment_id: i64) -> bool {
        self.completed_payments.lock().unwrap().contains(&payment_id)
    }

    async fn get_balances(&self) -> HashMap<String, Balance> {
        self.balances.lock().unwrap().clone()
    }

    async fn get_trading_pair_info(&self, _pair: &str) -> Decimal {
        *self.pair_min_amount.lock().unwrap()
    }

    async fn get_crypto_address(&self, _currency: &str) -> String {
        self.crypto_address.lock().unwrap().clone()
    }

    async fn withdraw(
        &self,
        address: &str,
        destination_tag: &str,
        amount: Decimal,
        currency_id: i32,
    ) -> Option<i64> {
        self.withdrawals.lock().unwrap().push(InternalWithdrawal {
            address: address.to_string(),
            destination_tag: destination_tag.to_string(),
            amount,
            currency_id,
        });
        *self.withdraw_payment_id.lock().unwrap()
    }

    async fn remove_order(&self, order_id: Uuid, _from: &str, _to: &str) -> bool {
        if !*self.removable.lock().unwrap() {
            return false;
        }
        self.orders.lock().unwrap().remove(&order_id);
        true
    }

    async fn add_order(
        &self,
        currency_from: &str,
        currency_to: &str,
        amount: Decimal,
        price: Decimal,
        is_sell_order: bool,
    ) -> Option<Uuid> {
        if !*self.accept_orders.lock().unwrap() {
            return None;
        }
        let assigned_id = Uuid::new_v4();
        self.added_orders.lock().unwrap().push(AddedOrder {
            currency_from: currency_from.to_string(),
            currency_to: currency_to.to_string(),
            amount,
            price,
            is_sell_order,
            assigned_id,
        });
        Some(assigned_id)
    }
}

/// Exchange fake.
pub struct MockTradingVenue {
    pub balances: Mutex<HashMap<String, Balance>>,
    /// What `get_public_trading_orders` returns, verbatim.
    pub book: Mutex<Vec<TradingOrder>>,
    pub trade_result: Mutex<bool>,
    pub withdraw_result: Mutex<bool>,
    pub crypto_address: Mutex<String>,
    pub buys: Mutex<Vec<TradeRequest>>,
    pub sells: Mutex<Vec<TradeRequest>>,
    pub withdrawals: Mutex<Vec<TradingWithdrawal>>,
}

impl Default for MockTradingVenue {
    fn default() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            book: Mutex::new(Vec::new()),
            trade_result: Mutex::new(true),
            withdraw_result: Mutex::new(true),
            crypto_address: Mutex::new("trading-address".to_string()),
            buys: Mutex::new(Vec::new()),
            sells: Mutex::new(Vec::new()),
            withdrawals: Mutex::new(Vec::new()),
        }
    }
}

impl MockTradingVenue {
    pub fn set_balance(&self, currency: &str, balance: Decimal) {
        self.balances.lock().unwrap().insert(
            currency.to_string(),
            Balance {
                currency: currency.to_string(),
                balance,
                reserved: Decimal::ZERO,
            },
        );
    }
}

#[async_trait]
impl TradingVenue for MockTradingVenue {
    async fn get_trading_balances(&self) -> HashMap<String, Balance> {
        self.balances.lock().unwrap().clone()
    }

    async fn get_public_trading_orders(
        &self,
        _pair: &str,
        _usdc_trading_limit: Decimal,
        _crypto_trading_limit: Decimal,
        _internal_crypto_balance: Decimal,
        _internal_usdc_balance: Decimal,
        _pair_min_amount: Decimal,
    ) -> Vec<TradingOrder> {
        self.book.lock().unwrap().clone()
    }

    async fn buy(
        &self,
        pair: &str,
        trading_price: Decimal,
        internal_price: Decimal,
        amount: Decimal,
        internal_pair: &str,
    ) -> bool {
        self.buys.lock().unwrap().push(TradeRequest {
            pair: pair.to_string(),
            trading_price,
            internal_price,
            amount,
            internal_pair: internal_pair.to_string(),
        });
        *self.trade_result.lock().unwrap()
    }

    async fn sell(
        &self,
        pair: &str,
        trading_price: Decimal,
        internal_price: Decimal,
        amount: Decimal,
        internal_pair: &str,
    ) -> bool {
        self.sells.lock().unwrap().push(TradeRequest {
            pair: pair.to_string(),
            trading_price,
            internal_price,
            amount,
            internal_pair: internal_pair.to_string(),
        });
        *self.trade_result.lock().unwrap()
    }

    async fn withdraw(
        &self,
        address: &str,
        amount: Decimal,
        currency: &str,
        withdrawal_network: &str,
    ) -> bool {
        self.withdrawals.lock().unwrap().push(TradingWithdrawal {
            address: address.to_string(),
            amount,
            currency: currency.to_string(),
            withdrawal_network: withdrawal_network.to_string(),
        });
        *self.withdraw_result.lock().unwrap()
    }

    async fn get_crypto_address(&self, _currency: &str, _network: &str) -> String {
        self.crypto_address.lock().unwrap().clone()
    }
}
