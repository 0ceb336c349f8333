use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Immutable engine configuration, loaded once at startup and never re-read
/// mid-run. Shared read-only across all symbol workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub symbols: Vec<String>,
    /// Asset the account balance is denominated in
    pub quote_asset: String,
    /// Paper-trading starting balance
    pub initial_balance: f64,

    /// Fraction of equity risked per trade (0.01 = 1%)
    pub risk_percent: f64,
    pub atr_period: usize,
    pub fast_window: usize,
    pub slow_window: usize,
    /// Initial stop distance in ATR multiples
    pub stop_atr_multiplier: f64,
    /// Profit (in R) required to move the stop to breakeven
    pub breakeven_r: f64,
    /// Profit (in R) required to start trailing
    pub trail_r: f64,
    /// Trailing stop distance in ATR multiples
    pub trail_atr_multiplier: f64,

    /// Signals weaker than this fall back to hold unless force_trade is set
    pub min_signal_strength: f64,
    pub force_trade: bool,

    pub cycle_interval_secs: u64,
    /// Cap on cycles running concurrently across all symbols
    pub max_concurrent_cycles: usize,
    /// Candles older than this mark the feed degraded; 0 disables the check
    pub stale_after_secs: i64,

    /// Ring-buffer capacity per symbol; must cover the largest window
    pub candle_capacity: usize,
    pub ma_cache_entries: usize,
    pub atr_cache_entries: usize,

    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            quote_asset: "USDT".to_string(),
            initial_balance: 10_000.0,
            risk_percent: 0.01,
            atr_period: 14,
            fast_window: 10,
            slow_window: 20,
            stop_atr_multiplier: 2.0,
            breakeven_r: 1.0,
            trail_r: 2.0,
            trail_atr_multiplier: 2.0,
            min_signal_strength: 0.002,
            force_trade: false,
            cycle_interval_secs: 60,
            max_concurrent_cycles: 8,
            stale_after_secs: 300,
            candle_capacity: 200,
            ma_cache_entries: 50,
            atr_cache_entries: 25,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load from an optional file plus `TRADEBOT__*` environment overrides,
    /// falling back to defaults for anything unset.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("TRADEBOT").separator("__"),
        );

        let cfg: EngineConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.symbols.is_empty() {
            anyhow::bail!("at least one symbol is required");
        }
        if self.fast_window == 0 || self.fast_window >= self.slow_window {
            anyhow::bail!(
                "fast_window ({}) must be non-zero and smaller than slow_window ({})",
                self.fast_window,
                self.slow_window
            );
        }
        if self.atr_period == 0 {
            anyhow::bail!("atr_period must be non-zero");
        }
        if !(self.risk_percent > 0.0 && self.risk_percent <= 1.0) {
            anyhow::bail!("risk_percent must be in (0, 1]");
        }
        if self.candle_capacity <= self.slow_window
            || self.candle_capacity <= self.atr_period + 1
        {
            anyhow::bail!(
                "candle_capacity ({}) must exceed the largest window",
                self.candle_capacity
            );
        }
        if self.max_concurrent_cycles == 0 {
            anyhow::bail!("max_concurrent_cycles must be non-zero");
        }
        self.retry.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_windows() {
        let cfg = EngineConfig {
            fast_window: 20,
            slow_window: 10,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_risk() {
        let cfg = EngineConfig {
            risk_percent: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_small_candle_capacity() {
        let cfg = EngineConfig {
            candle_capacity: 15,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_deserializes_with_partial_fields() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"risk_percent": 0.02, "fast_window": 5}"#).unwrap();
        assert_eq!(cfg.risk_percent, 0.02);
        assert_eq!(cfg.fast_window, 5);
        // Everything else takes defaults
        assert_eq!(cfg.slow_window, 20);
        assert_eq!(cfg.atr_period, 14);
    }
}
