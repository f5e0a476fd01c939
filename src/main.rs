use anyhow::Result;
use market_mirror::{app, Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging at the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!(
        name = %config.app.name,
        version = %config.app.version,
        currencies = config.crypto_currencies.len(),
        "starting market mirror"
    );

    app::run(config).await
}
