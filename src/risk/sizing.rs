use crate::error::EngineError;
use crate::models::Side;

/// Quantity such that hitting the stop loses exactly `risk_percent` of
/// account equity.
///
/// `stop_distance` is the per-unit gap between entry and stop; the same
/// formula serves long and short entries because the caller passes the
/// unsigned distance.
pub fn position_size(
    equity: f64,
    risk_percent: f64,
    entry_price: f64,
    stop_price: f64,
) -> Result<f64, EngineError> {
    if !(equity.is_finite() && equity > 0.0) {
        return Err(EngineError::InvalidRisk(format!(
            "equity must be positive, got {equity}"
        )));
    }
    if !(risk_percent.is_finite() && risk_percent > 0.0 && risk_percent <= 1.0) {
        return Err(EngineError::InvalidRisk(format!(
            "risk_percent must be in (0, 1], got {risk_percent}"
        )));
    }

    let stop_distance = (entry_price - stop_price).abs();
    if !(stop_distance.is_finite() && stop_distance > 0.0) {
        return Err(EngineError::InvalidRisk(format!(
            "stop distance must be positive, entry {entry_price} stop {stop_price}"
        )));
    }

    Ok(equity * risk_percent / stop_distance)
}

/// Initial stop placed `multiplier` ATRs against the entry direction
pub fn initial_stop(entry_price: f64, atr: f64, multiplier: f64, side: Side) -> Result<f64, EngineError> {
    if !(atr.is_finite() && atr > 0.0) {
        return Err(EngineError::InvalidRisk(format!(
            "atr must be positive, got {atr}"
        )));
    }
    if !(multiplier.is_finite() && multiplier > 0.0) {
        return Err(EngineError::InvalidRisk(format!(
            "stop multiplier must be positive, got {multiplier}"
        )));
    }
    if side == Side::Flat {
        return Err(EngineError::InvalidRisk(
            "cannot place a stop for a flat position".into(),
        ));
    }

    Ok(entry_price - side.sign() * multiplier * atr)
}
