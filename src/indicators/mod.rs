// Technical indicator primitives and the per-symbol indicator cache
pub mod atr;
pub mod cache;
pub mod moving_average;

pub use atr::{calculate_atr, true_range, wilder_step};
pub use cache::{CacheKey, CacheStats, IndicatorCache, IndicatorKind};
pub use moving_average::{calculate_ema, calculate_sma};
