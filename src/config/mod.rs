//! Configuration management.
//!
//! Settings load from `config/config.json` and the environment
//! (`MM`-prefixed variables override file values).

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub log: LogConfig,
    /// One balance worker and one trading worker are built per entry.
    #[serde(default)]
    pub crypto_currencies: Vec<CryptoCurrency>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `info` or `market_mirror=debug`.
    pub level: String,
}

/// Per-currency settings shared by the currency's two workers.
#[derive(Debug, Clone, Deserialize)]
pub struct CryptoCurrency {
    /// Identifier the kiosk withdraw endpoint expects.
    pub currency_id: i32,
    /// Target fraction of total inventory kept on the exchange.
    pub balance_percent: Decimal,
    /// Relative deadband around the target before rebalancing triggers.
    pub threshold_percent: Decimal,
    /// Minimum absolute drift worth transferring; suppresses dust moves.
    pub threshold_abs: Decimal,
    /// Markup applied when publishing exchange asks on the kiosk.
    pub sell_multiplier: Decimal,
    /// Markdown applied when publishing exchange bids on the kiosk.
    pub buy_multiplier: Decimal,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
    pub internal_settings: InternalSettings,
    pub trading_settings: TradingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InternalSettings {
    pub url: String,
    pub key: String,
    pub secret: String,
    /// Kiosk pair syntax: `FROM,TO`.
    pub pair: String,
    pub currency: String,
    /// Deposit address; resolved lazily and memoized when empty.
    #[serde(default)]
    pub crypto_address: String,
    /// Fraction of the kiosk USDC balance the mirror may commit.
    pub usdc_usage_limit: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingSettings {
    pub url: String,
    pub key: String,
    pub secret: String,
    /// Exchange pair syntax, e.g. `USDC_BTC`.
    pub pair: String,
    pub currency: String,
    #[serde(default)]
    pub crypto_address: String,
    /// Memo for destination-tag chains; empty when unused.
    #[serde(default)]
    pub destination_tag: String,
    /// Wrapped-asset network to withdraw as; empty for the native chain.
    #[serde(default)]
    pub withdrawal_network: String,
    /// Fraction of the exchange USDC balance the mirror may spend.
    pub usdc_usage_limit: Decimal,
}

fn default_timeout_minutes() -> u32 {
    60
}

impl Config {
    /// Load configuration from the config file and environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("MM"))
            .build()
            .context("failed to build configuration")?;

        config
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.app.name.is_empty(), "app.name must be set");
        anyhow::ensure!(!self.app.version.is_empty(), "app.version must be set");
        anyhow::ensure!(!self.log.level.is_empty(), "log.level must be set");

        for currency in &self.crypto_currencies {
            currency.validate()?;
        }

        Ok(())
    }
}

impl CryptoCurrency {
    fn validate(&self) -> Result<()> {
        let symbol = &self.internal_settings.currency;

        anyhow::ensure!(
            self.balance_percent > Decimal::ZERO && self.balance_percent < Decimal::ONE,
            "{symbol}: balance_percent must be in (0, 1)"
        );
        anyhow::ensure!(
            self.threshold_percent >= Decimal::ZERO && self.threshold_percent < Decimal::ONE,
            "{symbol}: threshold_percent must be in [0, 1)"
        );
        anyhow::ensure!(
            self.threshold_abs >= Decimal::ZERO,
            "{symbol}: threshold_abs must not be negative"
        );
        anyhow::ensure!(
            self.sell_multiplier > Decimal::ONE,
            "{symbol}: sell_multiplier must be greater than 1"
        );
        anyhow::ensure!(
            self.buy_multiplier > Decimal::ZERO && self.buy_multiplier < Decimal::ONE,
            "{symbol}: buy_multiplier must be in (0, 1)"
        );
        anyhow::ensure!(
            self.internal_settings.pair.split_once(',').is_some(),
            "{symbol}: internal pair must use the 'FROM,TO' syntax"
        );

        for (venue, limit) in [
            ("internal", self.internal_settings.usdc_usage_limit),
            ("trading", self.trading_settings.usdc_usage_limit),
        ] {
            anyhow::ensure!(
                limit > Decimal::ZERO && limit <= Decimal::ONE,
                "{symbol}: {venue} usdc_usage_limit must be in (0, 1]"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Config {
        serde_json::from_str(
            r#"{
                "app": {"name": "market-mirror", "version": "0.1.0"},
                "log": {"level": "info"},
                "crypto_currencies": [{
                    "currency_id": 2001,
                    "balance_percent": 0.8,
                    "threshold_percent": 0.1,
                    "threshold_abs": 0.2,
                    "sell_multiplier": 1.005,
                    "buy_multiplier": 0.995,
                    "internal_settings": {
                        "url": "https://kiosk.example.com",
                        "key": "k",
                        "secret": "s",
                        "pair": "BTC,USDC",
                        "currency": "BTC",
                        "usdc_usage_limit": 0.4
                    },
                    "trading_settings": {
                        "url": "https://poloniex.com",
                        "key": "k",
                        "secret": "s",
                        "pair": "USDC_BTC",
                        "currency": "BTC",
                        "destination_tag": "777",
                        "usdc_usage_limit": 0.8
                    }
                }]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn sample_config_is_valid() {
        let config = sample();
        assert!(config.validate().is_ok());
        assert_eq!(config.crypto_currencies.len(), 1);
        assert_eq!(config.crypto_currencies[0].timeout_minutes, 60);
        assert_eq!(config.crypto_currencies[0].balance_percent, dec!(0.8));
    }

    #[test]
    fn out_of_range_multiplier_is_rejected() {
        let mut config = sample();
        config.crypto_currencies[0].sell_multiplier = dec!(0.9);
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_pair_is_rejected() {
        let mut config = sample();
        config.crypto_currencies[0].internal_settings.pair = "BTCUSDC".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn usage_limit_above_one_is_rejected() {
        let mut config = sample();
        config.crypto_currencies[0].trading_settings.usdc_usage_limit = dec!(1.5);
        assert!(config.validate().is_err());
    }
}
