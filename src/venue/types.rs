//! Domain types shared by the venue adapters and the workers.

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

/// Account balance entry as reported by a venue.
///
/// The kiosk reports `balance` and `reserved` separately; the exchange
/// only reports a free balance and `reserved` stays zero.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Balance {
    #[serde(rename = "currencyIsoCode")]
    pub currency: String,
    #[serde(default)]
    pub balance: Decimal,
    #[serde(default)]
    pub reserved: Decimal,
}

/// Order resting on (or completed against) the kiosk book.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalOrder {
    pub id: Uuid,
    pub initial_amount: Decimal,
    #[serde(default)]
    pub amount_left: Decimal,
    pub price: Decimal,
    pub is_sell_order: bool,
}

/// One consolidated level of the external book, already aligned to the
/// operator's limits and kiosk-side inventory by the depth walk.
#[derive(Debug, Clone, PartialEq)]
pub struct TradingOrder {
    pub rate: Decimal,
    pub amount: Decimal,
    pub is_sell_order: bool,
}
