//! Venue adapters.
//!
//! ## Kiosk backend
//! Signed REST façade over the customer-facing venue: resting orders,
//! balances, completed-order lookup, withdrawals, deposit addresses and
//! pair metadata.
//!
//! ## Exchange
//! Signed REST façade over the public venue: cached balances, the book
//! depth walk, fill-or-kill trading with price walking, withdrawals and
//! deposit addresses.

mod kiosk;
pub mod mock;
mod poloniex;
pub mod traits;
pub mod types;

pub use kiosk::KioskClient;
pub use poloniex::PoloniexClient;
pub use traits::{InternalVenue, TradingVenue};
pub use types::{Balance, InternalOrder, TradingOrder};
