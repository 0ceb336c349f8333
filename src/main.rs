use std::path::PathBuf;
use std::sync::Arc;

use tradebot::broker::PaperBroker;
use tradebot::engine::{shutdown_channel, Scheduler};
use tradebot::market::{SyntheticFeed, Trend};
use tradebot::metrics::LogSink;
use tradebot::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let config_path = std::env::var("CONFIG_PATH").ok().map(PathBuf::from);
    let config = Arc::new(EngineConfig::load(config_path.as_deref())?);

    tracing::info!(
        symbols = ?config.symbols,
        interval_secs = config.cycle_interval_secs,
        risk_percent = config.risk_percent,
        "tradebot starting"
    );

    let broker = Arc::new(PaperBroker::new(
        config.quote_asset.clone(),
        config.initial_balance,
    ));
    let market = Arc::new(SyntheticFeed::new(Trend::Sideways, seed_from_env()));
    let metrics = Arc::new(LogSink);

    let scheduler = Scheduler::new(Arc::clone(&config), broker, market, metrics);
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, draining workers");
    shutdown_tx.send(true).ok();

    scheduler_task.await?;
    tracing::info!("tradebot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tradebot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn seed_from_env() -> u64 {
    std::env::var("FEED_SEED")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(42)
}
