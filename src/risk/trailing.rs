use crate::models::{Position, StopStage};

/// Thresholds driving the stop state machine, all in R units except the
/// ATR multiplier
#[derive(Debug, Clone, Copy)]
pub struct TrailParams {
    /// Unrealized R at which the stop moves to entry
    pub breakeven_r: f64,
    /// Unrealized R at which the stop starts trailing the price
    pub trail_r: f64,
    /// ATR multiple kept between price and a trailing stop
    pub trail_multiplier: f64,
}

/// What the stop machine did this candle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopAction {
    Held,
    MovedToBreakeven,
    Tightened,
    /// Stop was crossed; position closed at the stop price
    Closed { exit_price: f64, realized_r: f64 },
}

/// Advance the trailing-stop state machine by one observation.
///
/// The stop only ever tightens. Stages advance at most one step per call,
/// so a single explosive candle moves INITIAL to BREAKEVEN but waits for
/// the next one before trailing. A price at or through the stop closes the
/// position at the stop price regardless of stage.
pub fn advance_trailing_stop(
    position: &mut Position,
    price: f64,
    atr: f64,
    params: &TrailParams,
) -> StopAction {
    if !position.is_open() || position.initial_risk <= 0.0 {
        return StopAction::Held;
    }

    let sign = position.side.sign();

    // Stop crossed: exit first, stages are irrelevant
    if (price - position.stop_price) * sign <= 0.0 {
        let exit_price = position.stop_price;
        let realized_r = (exit_price - position.entry_price) * sign / position.initial_risk;
        position.realized_r += realized_r;
        position.close();
        return StopAction::Closed {
            exit_price,
            realized_r,
        };
    }

    let unrealized_r = position.unrealized_r(price);

    match position.stage {
        StopStage::Initial => {
            if unrealized_r >= params.breakeven_r {
                position.stop_price = position.entry_price;
                position.stage = StopStage::Breakeven;
                return StopAction::MovedToBreakeven;
            }
            StopAction::Held
        }
        StopStage::Breakeven => {
            if unrealized_r >= params.trail_r {
                position.stage = StopStage::Trailing;
                return tighten(position, price, atr, params);
            }
            StopAction::Held
        }
        StopStage::Trailing => tighten(position, price, atr, params),
    }
}

/// Move the stop to `price - sign * multiplier * atr` when that is strictly
/// tighter than the current stop
fn tighten(position: &mut Position, price: f64, atr: f64, params: &TrailParams) -> StopAction {
    let sign = position.side.sign();
    let candidate = price - sign * params.trail_multiplier * atr;

    if (candidate - position.stop_price) * sign > 0.0 {
        position.stop_price = candidate;
        StopAction::Tightened
    } else {
        StopAction::Held
    }
}
