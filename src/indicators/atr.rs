/// Average True Range (ATR)
///
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// Smoothed with Wilder's method: atr = (prev_atr * (period - 1) + tr) / period.
use crate::models::Candle;

/// True range of one candle given the previous close
pub fn true_range(candle: &Candle, prev_close: f64) -> f64 {
    (candle.high - candle.low)
        .max((candle.high - prev_close).abs())
        .max((candle.low - prev_close).abs())
}

/// One Wilder smoothing step
pub fn wilder_step(prev_atr: f64, tr: f64, period: usize) -> f64 {
    (prev_atr * (period as f64 - 1.0) + tr) / period as f64
}

/// Full-scan ATR over the candle history.
///
/// Needs `period + 1` candles (one extra for the first previous close).
/// Returns None when there is not enough data.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut true_ranges = Vec::with_capacity(candles.len() - 1);
    for pair in candles.windows(2) {
        true_ranges.push(true_range(&pair[1], pair[0].close));
    }

    // Seed with the simple average of the first `period` true ranges,
    // then apply Wilder smoothing for the rest
    let mut atr = true_ranges.iter().take(period).sum::<f64>() / period as f64;
    for tr in &true_ranges[period..] {
        atr = wilder_step(atr, *tr, period);
    }

    Some(atr)
}
