use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;

use crate::broker::Broker;
use crate::config::EngineConfig;
use crate::engine::TradingCycleOrchestrator;
use crate::indicators::IndicatorCache;
use crate::market::MarketData;
use crate::metrics::MetricsSink;

/// Create the shutdown signal pair. Flip the sender to true to stop all
/// workers after their in-flight cycle.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Spawns one worker task per symbol and fans the shutdown signal out to
/// all of them.
///
/// A semaphore bounds how many cycles run at once across symbols. Workers
/// check the shutdown flag between cycles only, so a cycle that has started
/// executing always finishes before the worker exits.
pub struct Scheduler {
    config: Arc<EngineConfig>,
    cache: IndicatorCache,
    broker: Arc<dyn Broker>,
    market: Arc<dyn MarketData>,
    metrics: Arc<dyn MetricsSink>,
}

impl Scheduler {
    pub fn new(
        config: Arc<EngineConfig>,
        broker: Arc<dyn Broker>,
        market: Arc<dyn MarketData>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let cache = IndicatorCache::with_caps(
            config.candle_capacity,
            config.ma_cache_entries,
            config.atr_cache_entries,
        );
        Self {
            config,
            cache,
            broker,
            market,
            metrics,
        }
    }

    /// Run until the shutdown signal flips to true and every worker has
    /// drained. Missed ticks are skipped rather than bursted.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_cycles));
        let interval = Duration::from_secs(self.config.cycle_interval_secs.max(1));

        let mut workers = Vec::with_capacity(self.config.symbols.len());
        for symbol in &self.config.symbols {
            let mut orchestrator = TradingCycleOrchestrator::new(
                symbol.clone(),
                Arc::clone(&self.config),
                self.cache.clone(),
                Arc::clone(&self.broker),
                Arc::clone(&self.market),
                Arc::clone(&self.metrics),
            );
            let semaphore = Arc::clone(&semaphore);
            let mut shutdown = shutdown.clone();

            workers.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                tracing::info!(symbol = %orchestrator.symbol(), "worker started");

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if *shutdown.borrow() {
                                break;
                            }
                            let permit = match semaphore.acquire().await {
                                Ok(permit) => permit,
                                Err(_) => break,
                            };
                            orchestrator.run_cycle().await;
                            drop(permit);
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }

                tracing::info!(symbol = %orchestrator.symbol(), "worker stopped");
            }));
        }

        for worker in workers {
            if let Err(err) = worker.await {
                tracing::error!(%err, "worker task panicked");
            }
        }
        tracing::info!("scheduler drained");
    }
}
