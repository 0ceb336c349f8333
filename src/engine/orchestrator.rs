use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use crate::broker::{Broker, OrderRequest, OrderSide, OrderType};
use crate::config::EngineConfig;
use crate::error::ErrorKind;
use crate::indicators::{IndicatorCache, IndicatorKind};
use crate::market::MarketData;
use crate::metrics::MetricsSink;
use crate::models::{Candle, Direction, Position, Side, Signal};
use crate::retry::RetryExecutor;
use crate::risk::{advance_trailing_stop, initial_stop, position_size, StopAction, TrailParams};
use crate::Result;

/// How one cycle ended. Failures are scoped to the cycle; the worker keeps
/// running and tries again next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// An order was executed (entry or close)
    Traded(OrderSide),
    /// Signal evaluated, nothing to do
    Held,
    /// Cycle abandoned before signaling
    Skipped(&'static str),
    Failed(ErrorKind),
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Traded(OrderSide::Buy) => "traded_buy",
            CycleOutcome::Traded(OrderSide::Sell) => "traded_sell",
            CycleOutcome::Held => "held",
            CycleOutcome::Skipped(_) => "skipped",
            CycleOutcome::Failed(_) => "failed",
        }
    }
}

/// Drives one symbol through fetch, signal, validate and execute.
///
/// Owns that symbol's position and crossover memory; nothing else mutates
/// them. All broker and market calls go through the retry executor.
pub struct TradingCycleOrchestrator {
    symbol: String,
    config: Arc<EngineConfig>,
    cache: IndicatorCache,
    retry: RetryExecutor,
    broker: Arc<dyn Broker>,
    market: Arc<dyn MarketData>,
    metrics: Arc<dyn MetricsSink>,
    position: Position,
    /// fast - slow from the previous cycle; None until both averages exist
    prev_diff: Option<f64>,
}

impl TradingCycleOrchestrator {
    pub fn new(
        symbol: impl Into<String>,
        config: Arc<EngineConfig>,
        cache: IndicatorCache,
        broker: Arc<dyn Broker>,
        market: Arc<dyn MarketData>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let symbol = symbol.into();
        let retry = RetryExecutor::with_metrics(config.retry.clone(), Arc::clone(&metrics));
        Self {
            position: Position::flat(&symbol),
            symbol,
            config,
            cache,
            retry,
            broker,
            market,
            metrics,
            prev_diff: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Run one full cycle. Never propagates errors; every failure is
    /// reported and folded into the outcome so the scheduler loop stays up.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let start = Instant::now();

        let outcome = match self.cycle_inner().await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.metrics.cycle_error(&self.symbol, &err);
                tracing::error!(symbol = %self.symbol, %err, "cycle failed");
                CycleOutcome::Failed(err.kind())
            }
        };

        self.metrics
            .cycle_completed(&self.symbol, start.elapsed(), outcome.label());
        self.metrics.cache_snapshot(&self.cache.stats());
        outcome
    }

    async fn cycle_inner(&mut self) -> Result<CycleOutcome> {
        let candle = self.fetch_candle().await?;

        if self.config.stale_after_secs > 0 {
            let age = (Utc::now() - candle.timestamp).num_seconds();
            if age > self.config.stale_after_secs {
                tracing::warn!(symbol = %self.symbol, age_secs = age, "stale candle, skipping cycle");
                return Ok(CycleOutcome::Skipped("stale candle"));
            }
        }

        let fast = self.cache.get_or_compute(
            &self.symbol,
            IndicatorKind::Sma,
            self.config.fast_window,
            &candle,
        );
        let slow = self.cache.get_or_compute(
            &self.symbol,
            IndicatorKind::Sma,
            self.config.slow_window,
            &candle,
        );
        let atr = self.cache.get_or_compute(
            &self.symbol,
            IndicatorKind::Atr,
            self.config.atr_period,
            &candle,
        );

        let (Some(fast), Some(slow), Some(atr)) = (fast, slow, atr) else {
            tracing::debug!(
                symbol = %self.symbol,
                candles = self.cache.candle_count(&self.symbol),
                "warming up"
            );
            return Ok(CycleOutcome::Skipped("insufficient data"));
        };

        let signal = self.evaluate_signal(&candle, fast, slow);
        let direction = self.validate(&signal);

        let outcome = match direction {
            Direction::Hold => self.maintain_position(&candle, atr).await?,
            Direction::Buy | Direction::Sell => self.execute(direction, &candle, atr).await?,
        };

        self.metrics.position_snapshot(&self.position, candle.close);
        Ok(outcome)
    }

    async fn fetch_candle(&self) -> Result<Candle> {
        let market = Arc::clone(&self.market);
        let symbol = self.symbol.clone();
        self.retry
            .execute("fetch_candle", move || {
                let market = Arc::clone(&market);
                let symbol = symbol.clone();
                async move { market.latest_candle(&symbol).await }
            })
            .await
    }

    /// Crossover detection against the previous cycle's fast/slow gap.
    /// The first cycle with both averages counts as a cross if they already
    /// diverge, so a trend in progress at startup is still acted on.
    fn evaluate_signal(&mut self, candle: &Candle, fast: f64, slow: f64) -> Signal {
        let diff = fast - slow;
        let crossed_up = diff > 0.0 && self.prev_diff.map_or(true, |p| p <= 0.0);
        let crossed_down = diff < 0.0 && self.prev_diff.map_or(true, |p| p >= 0.0);
        self.prev_diff = Some(diff);

        let direction = if crossed_up {
            Direction::Buy
        } else if crossed_down {
            Direction::Sell
        } else {
            Direction::Hold
        };

        let strength = if slow > 0.0 {
            (diff.abs() / slow).clamp(0.0, 1.0)
        } else {
            0.0
        };

        if direction != Direction::Hold {
            tracing::info!(
                symbol = %self.symbol,
                ?direction,
                strength,
                fast,
                slow,
                "crossover signal"
            );
        }

        Signal {
            symbol: self.symbol.clone(),
            direction,
            strength,
            price: candle.close,
            timestamp: candle.timestamp,
        }
    }

    /// Demote signals the engine must not act on to Hold
    fn validate(&self, signal: &Signal) -> Direction {
        if signal.direction == Direction::Hold {
            return Direction::Hold;
        }

        if signal.strength < self.config.min_signal_strength && !self.config.force_trade {
            tracing::debug!(
                symbol = %self.symbol,
                strength = signal.strength,
                min = self.config.min_signal_strength,
                "signal below strength floor"
            );
            return Direction::Hold;
        }

        // Already positioned the same way; nothing to add
        let same_way = matches!(
            (signal.direction, self.position.side),
            (Direction::Buy, Side::Long) | (Direction::Sell, Side::Short)
        );
        if same_way {
            return Direction::Hold;
        }

        signal.direction
    }

    /// No actionable signal: run the stop machine if a position is open
    async fn maintain_position(&mut self, candle: &Candle, atr: f64) -> Result<CycleOutcome> {
        if !self.position.is_open() {
            return Ok(CycleOutcome::Held);
        }

        let params = TrailParams {
            breakeven_r: self.config.breakeven_r,
            trail_r: self.config.trail_r,
            trail_multiplier: self.config.trail_atr_multiplier,
        };

        // Run the stop machine on a scratch copy; the live position only
        // changes once any required order has reached the broker, so a
        // failed close leaves it open for the next cycle.
        let mut updated = self.position.clone();
        let action = advance_trailing_stop(&mut updated, candle.close, atr, &params);

        match action {
            StopAction::Closed {
                exit_price,
                realized_r,
            } => {
                let order_side = exit_side(self.position.side);
                let quantity = self.position.quantity;
                self.place_market(order_side, quantity, exit_price).await?;
                self.position = updated;
                tracing::info!(
                    symbol = %self.symbol,
                    exit_price,
                    realized_r,
                    "stop hit, position closed"
                );
                Ok(CycleOutcome::Traded(order_side))
            }
            StopAction::MovedToBreakeven => {
                self.position = updated;
                tracing::info!(symbol = %self.symbol, stop = self.position.stop_price, "stop moved to breakeven");
                Ok(CycleOutcome::Held)
            }
            StopAction::Tightened => {
                self.position = updated;
                tracing::debug!(symbol = %self.symbol, stop = self.position.stop_price, "trailing stop tightened");
                Ok(CycleOutcome::Held)
            }
            StopAction::Held => Ok(CycleOutcome::Held),
        }
    }

    /// Act on a validated buy or sell signal
    async fn execute(
        &mut self,
        direction: Direction,
        candle: &Candle,
        atr: f64,
    ) -> Result<CycleOutcome> {
        // Opposite signal while positioned closes the trade; re-entry waits
        // for the next cycle's signal
        if self.position.is_open() {
            let exit_price = candle.close;
            let sign = self.position.side.sign();
            let realized_r = if self.position.initial_risk > 0.0 {
                (exit_price - self.position.entry_price) * sign / self.position.initial_risk
            } else {
                0.0
            };
            let order_side = exit_side(self.position.side);
            let quantity = self.position.quantity;

            self.place_market(order_side, quantity, exit_price).await?;
            self.position.realized_r += realized_r;
            self.position.close();

            tracing::info!(
                symbol = %self.symbol,
                exit_price,
                realized_r,
                "opposite signal, position closed"
            );
            return Ok(CycleOutcome::Traded(order_side));
        }

        let side = match direction {
            Direction::Buy => Side::Long,
            Direction::Sell => Side::Short,
            Direction::Hold => return Ok(CycleOutcome::Held),
        };

        let entry_price = candle.close;
        let stop_price = initial_stop(entry_price, atr, self.config.stop_atr_multiplier, side)?;

        let equity = self.fetch_balance().await?;
        let quantity = position_size(equity, self.config.risk_percent, entry_price, stop_price)?;

        // Risk-based size can exceed buying power when the stop is tight
        let notional = quantity * entry_price;
        if notional > equity {
            tracing::warn!(
                symbol = %self.symbol,
                notional,
                equity,
                "sized order exceeds balance, holding"
            );
            return Ok(CycleOutcome::Held);
        }

        let order_side = match direction {
            Direction::Buy => OrderSide::Buy,
            _ => OrderSide::Sell,
        };
        let result = self.place_market(order_side, quantity, entry_price).await?;
        let fill_price = result.fill_price.unwrap_or(entry_price);

        self.position
            .open(side, fill_price, quantity, stop_price, candle.timestamp);

        tracing::info!(
            symbol = %self.symbol,
            ?side,
            fill_price,
            quantity,
            stop_price,
            "position opened"
        );
        Ok(CycleOutcome::Traded(order_side))
    }

    async fn place_market(
        &self,
        side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> Result<crate::broker::OrderResult> {
        let request = OrderRequest {
            symbol: self.symbol.clone(),
            side,
            order_type: OrderType::Market,
            quantity,
            price,
        };
        let broker = Arc::clone(&self.broker);
        self.retry
            .execute("place_order", move || {
                let broker = Arc::clone(&broker);
                let request = request.clone();
                async move { broker.place_order(&request).await }
            })
            .await
    }

    async fn fetch_balance(&self) -> Result<f64> {
        let broker = Arc::clone(&self.broker);
        let asset = self.config.quote_asset.clone();
        self.retry
            .execute("fetch_balance", move || {
                let broker = Arc::clone(&broker);
                let asset = asset.clone();
                async move { broker.get_balance(&asset).await }
            })
            .await
    }
}

fn exit_side(side: Side) -> OrderSide {
    match side {
        Side::Short => OrderSide::Buy,
        _ => OrderSide::Sell,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::error::EngineError;
    use crate::market::ScriptedFeed;
    use crate::metrics::NullSink;
    use crate::retry::RetryPolicy;
    use chrono::{DateTime, Duration, Utc};

    fn base_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_else(Utc::now)
    }

    fn candle_at(i: i64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            timestamp: base_time() + Duration::minutes(i),
            open: close,
            high: close * 1.001,
            low: close * 0.999,
            close,
            volume: 1_000.0,
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            symbols: vec!["BTCUSDT".to_string()],
            fast_window: 3,
            slow_window: 5,
            atr_period: 3,
            candle_capacity: 32,
            stale_after_secs: 0,
            min_signal_strength: 0.0,
            retry: RetryPolicy {
                max_retries: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
                backoff_factor: 2.0,
                jitter_fraction: 0.0,
                attempt_timeout_ms: 1_000,
            },
            ..Default::default()
        }
    }

    fn orchestrator_with(
        config: EngineConfig,
        broker: PaperBroker,
        feed: ScriptedFeed,
    ) -> TradingCycleOrchestrator {
        let config = Arc::new(config);
        let cache = IndicatorCache::with_caps(
            config.candle_capacity,
            config.ma_cache_entries,
            config.atr_cache_entries,
        );
        TradingCycleOrchestrator::new(
            "BTCUSDT",
            config,
            cache,
            Arc::new(broker),
            Arc::new(feed),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn test_warmup_cycles_are_skipped() {
        let feed = ScriptedFeed::new();
        feed.extend((0..3).map(|i| candle_at(i, 100.0)));
        let mut orchestrator =
            orchestrator_with(test_config(), PaperBroker::new("USDT", 10_000.0), feed);

        for _ in 0..3 {
            assert_eq!(
                orchestrator.run_cycle().await,
                CycleOutcome::Skipped("insufficient data")
            );
        }
        assert!(!orchestrator.position().is_open());
    }

    #[tokio::test]
    async fn test_rising_closes_trigger_a_buy() {
        let feed = ScriptedFeed::new();
        // Steady climb: once both windows fill, fast sits above slow
        feed.extend((0..6).map(|i| candle_at(i, 100.0 + i as f64)));
        let broker = PaperBroker::new("USDT", 10_000.0);
        let mut orchestrator = orchestrator_with(test_config(), broker.clone(), feed);

        let mut outcomes = Vec::new();
        for _ in 0..6 {
            outcomes.push(orchestrator.run_cycle().await);
        }

        // Entry fires on the first cycle where both windows are filled
        assert_eq!(outcomes[4], CycleOutcome::Traded(OrderSide::Buy));
        assert_eq!(*outcomes.last().unwrap(), CycleOutcome::Held);
        assert!(orchestrator.position().is_open());
        assert_eq!(orchestrator.position().side, Side::Long);
        assert!(orchestrator.position().stop_price < orchestrator.position().entry_price);
        assert_eq!(broker.fills().len(), 1);
    }

    #[tokio::test]
    async fn test_same_direction_signal_does_not_stack() {
        let feed = ScriptedFeed::new();
        feed.extend((0..8).map(|i| candle_at(i, 100.0 + i as f64)));
        let broker = PaperBroker::new("USDT", 10_000.0);
        let mut orchestrator = orchestrator_with(test_config(), broker.clone(), feed);

        for _ in 0..8 {
            orchestrator.run_cycle().await;
        }

        // One entry only, regardless of how long the trend runs
        assert_eq!(broker.fills().len(), 1);
        assert!(orchestrator.position().is_open());
    }

    #[tokio::test]
    async fn test_weak_signal_is_held_unless_forced() {
        let mut config = test_config();
        config.min_signal_strength = 0.5; // far above anything this data produces

        let feed = ScriptedFeed::new();
        feed.extend((0..6).map(|i| candle_at(i, 100.0 + i as f64)));
        let broker = PaperBroker::new("USDT", 10_000.0);
        let mut orchestrator = orchestrator_with(config, broker.clone(), feed);

        for _ in 0..6 {
            orchestrator.run_cycle().await;
        }
        assert!(!orchestrator.position().is_open());
        assert!(broker.fills().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_retries_then_fails_cycle() {
        let feed = ScriptedFeed::new();
        // Feed is empty: every fetch is a fatal Malformed error
        let mut orchestrator =
            orchestrator_with(test_config(), PaperBroker::new("USDT", 10_000.0), feed);

        match orchestrator.run_cycle().await {
            CycleOutcome::Failed(kind) => assert_eq!(kind, ErrorKind::Fatal),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transient_order_failures_are_absorbed() {
        let feed = ScriptedFeed::new();
        feed.extend((0..6).map(|i| candle_at(i, 100.0 + i as f64)));
        let broker = PaperBroker::new("USDT", 10_000.0);
        broker.inject_failure(EngineError::Connection("reset".into()));
        broker.inject_failure(EngineError::RateLimited("429".into()));
        let mut orchestrator = orchestrator_with(test_config(), broker.clone(), feed);

        for _ in 0..6 {
            orchestrator.run_cycle().await;
        }

        // Entry succeeded on the third attempt inside one cycle
        assert!(orchestrator.position().is_open());
        assert_eq!(broker.order_attempts(), 3);
        assert_eq!(broker.fills().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_stop_out_order_keeps_position_open() {
        let feed = ScriptedFeed::new();
        // Climb into an entry, then drop through the stop twice
        feed.extend((0..5).map(|i| candle_at(i, 100.0 + i as f64)));
        feed.push(candle_at(5, 101.0));
        feed.push(candle_at(6, 101.0));
        let broker = PaperBroker::new("USDT", 10_000.0);
        let mut orchestrator = orchestrator_with(test_config(), broker.clone(), feed);

        for _ in 0..5 {
            orchestrator.run_cycle().await;
        }
        assert!(orchestrator.position().is_open());
        assert_eq!(broker.fills().len(), 1);
        let stop_before = orchestrator.position().stop_price;

        // Broker goes dark for the whole stop-out cycle (4 attempts)
        for _ in 0..4 {
            broker.inject_failure(EngineError::Connection("reset".into()));
        }
        match orchestrator.run_cycle().await {
            CycleOutcome::Failed(kind) => assert_eq!(kind, ErrorKind::Fatal),
            other => panic!("expected Failed, got {other:?}"),
        }

        // The close never reached the broker, so the engine must still
        // hold the position with its stop intact
        assert!(orchestrator.position().is_open());
        assert_eq!(orchestrator.position().stop_price, stop_before);
        assert_eq!(broker.fills().len(), 1);

        // Broker recovers; the next cycle's sell cross closes the trade
        assert_eq!(
            orchestrator.run_cycle().await,
            CycleOutcome::Traded(OrderSide::Sell)
        );
        assert!(!orchestrator.position().is_open());
        assert_eq!(broker.fills().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_candles_are_skipped() {
        let mut config = test_config();
        config.stale_after_secs = 60;

        let feed = ScriptedFeed::new();
        let mut old = candle_at(0, 100.0);
        old.timestamp = Utc::now() - Duration::minutes(30);
        feed.push(old);

        let mut orchestrator =
            orchestrator_with(config, PaperBroker::new("USDT", 10_000.0), feed);
        assert_eq!(
            orchestrator.run_cycle().await,
            CycleOutcome::Skipped("stale candle")
        );
    }
}
