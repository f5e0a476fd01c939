//! Application bootstrap and supervision.
//!
//! Builds the per-currency worker pairs, runs them as tokio tasks under
//! one cancellation token, and shuts everything down on the first fatal
//! worker error or an interrupt/termination signal.

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::venue::{KioskClient, PoloniexClient};
use crate::worker::{BalanceWorker, TradingWorker};

/// Run the bot until a shutdown signal or a fatal worker error.
///
/// Returns `Ok` on a clean signal-driven shutdown and `Err` when worker
/// construction fails or a worker reports a fatal error.
pub async fn run(config: Config) -> Result<()> {
    if config.crypto_currencies.is_empty() {
        bail!("no currencies configured");
    }

    let cancel = CancellationToken::new();
    let (notify_tx, mut notify_rx) = mpsc::channel::<anyhow::Error>(1);
    let mut workers = JoinSet::new();

    for currency in &config.crypto_currencies {
        let balance_worker = BalanceWorker::new(
            currency.clone(),
            KioskClient::new(&currency.internal_settings)?,
            PoloniexClient::new(&currency.trading_settings)?,
            notify_tx.clone(),
        );
        workers.spawn(balance_worker.run(cancel.clone()));

        // entries without a currency symbol are balance-only
        if currency.internal_settings.currency.is_empty() {
            continue;
        }

        let trading_worker = TradingWorker::new(
            currency.clone(),
            KioskClient::new(&currency.internal_settings)?,
            PoloniexClient::new(&currency.trading_settings)?,
        );
        workers.spawn(trading_worker.run(cancel.clone()));

        info!(
            currency = %currency.internal_settings.currency,
            "workers started"
        );
    }
    drop(notify_tx);

    let result = tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
        fatal = notify_rx.recv() => match fatal {
            Some(err) => Err(err.context("fatal worker error")),
            // every sender dropped without an error: nothing left to run
            None => Ok(()),
        }
    };

    cancel.cancel();
    while workers.join_next().await.is_some() {}

    result
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
