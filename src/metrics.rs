use std::time::Duration;

use crate::error::EngineError;
use crate::indicators::CacheStats;
use crate::models::Position;

/// Fire-and-forget metrics collaborator.
///
/// The engine emits these events every cycle but never depends on them for
/// correctness; all methods default to no-ops so a sink only overrides what
/// it cares about.
pub trait MetricsSink: Send + Sync {
    fn cycle_completed(&self, _symbol: &str, _latency: Duration, _outcome: &str) {}

    fn cache_snapshot(&self, _stats: &CacheStats) {}

    fn retry_attempted(&self, _operation: &str, _attempt: u32, _delay: Duration) {}

    fn cycle_error(&self, _symbol: &str, _error: &EngineError) {}

    fn position_snapshot(&self, _position: &Position, _last_price: f64) {}
}

/// Discards everything
pub struct NullSink;

impl MetricsSink for NullSink {}

/// Routes every event through tracing
pub struct LogSink;

impl MetricsSink for LogSink {
    fn cycle_completed(&self, symbol: &str, latency: Duration, outcome: &str) {
        tracing::info!(symbol, ?latency, outcome, "cycle completed");
    }

    fn cache_snapshot(&self, stats: &CacheStats) {
        tracing::debug!(
            hits = stats.hits,
            misses = stats.misses,
            entries = stats.entries,
            evictions = stats.evictions,
            "indicator cache"
        );
    }

    fn retry_attempted(&self, operation: &str, attempt: u32, delay: Duration) {
        tracing::warn!(operation, attempt, ?delay, "retrying after transient failure");
    }

    fn cycle_error(&self, symbol: &str, error: &EngineError) {
        tracing::error!(symbol, kind = ?error.kind(), %error, "cycle error");
    }

    fn position_snapshot(&self, position: &Position, last_price: f64) {
        if position.is_open() {
            tracing::info!(
                symbol = %position.symbol,
                side = ?position.side,
                entry = position.entry_price,
                stop = position.stop_price,
                stage = ?position.stage,
                unrealized = position.unrealized(last_price),
                "open position"
            );
        } else {
            tracing::info!(
                symbol = %position.symbol,
                realized_r = position.realized_r,
                "flat"
            );
        }
    }
}
