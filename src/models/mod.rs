use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candlestick data for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trading signal direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

/// One signal per symbol per cycle; not persisted beyond the cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    /// Normalized fast/slow distance, clamped to [0, 1]
    pub strength: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Which way a position points
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Flat,
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short, 0 while flat. Lets stop and P&L math
    /// stay branch-free across both directions.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
            Side::Flat => 0.0,
        }
    }
}

/// Trailing-stop stage; only ever moves forward while the position is open
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopStage {
    Initial,
    Breakeven,
    Trailing,
}

/// At most one position per symbol. Mutated only by the worker that owns
/// the symbol; reset to flat on full close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_price: f64,
    /// Per-unit distance between entry and the initial stop (one R)
    pub initial_risk: f64,
    pub stage: StopStage,
    /// Cumulative realized profit in R units across closed trades
    pub realized_r: f64,
    pub entry_time: Option<DateTime<Utc>>,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            side: Side::Flat,
            entry_price: 0.0,
            quantity: 0.0,
            stop_price: 0.0,
            initial_risk: 0.0,
            stage: StopStage::Initial,
            realized_r: 0.0,
            entry_time: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.side != Side::Flat
    }

    /// Open a new position in place. The caller has already sized the order
    /// and computed the initial stop.
    pub fn open(
        &mut self,
        side: Side,
        entry_price: f64,
        quantity: f64,
        stop_price: f64,
        entry_time: DateTime<Utc>,
    ) {
        self.side = side;
        self.entry_price = entry_price;
        self.quantity = quantity;
        self.stop_price = stop_price;
        self.initial_risk = (entry_price - stop_price) * side.sign();
        self.stage = StopStage::Initial;
        self.entry_time = Some(entry_time);
    }

    /// Reset to flat after a full close. Keeps the cumulative realized R.
    pub fn close(&mut self) {
        self.side = Side::Flat;
        self.entry_price = 0.0;
        self.quantity = 0.0;
        self.stop_price = 0.0;
        self.initial_risk = 0.0;
        self.stage = StopStage::Initial;
        self.entry_time = None;
    }

    /// Unrealized P&L in quote currency at the given price
    pub fn unrealized(&self, current_price: f64) -> f64 {
        (current_price - self.entry_price) * self.side.sign() * self.quantity
    }

    /// Unrealized profit expressed in R units (multiples of initial risk)
    pub fn unrealized_r(&self, current_price: f64) -> f64 {
        if self.initial_risk <= 0.0 {
            return 0.0;
        }
        (current_price - self.entry_price) * self.side.sign() / self.initial_risk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_position() {
        let position = Position::flat("BTCUSDT");
        assert!(!position.is_open());
        assert_eq!(position.side, Side::Flat);
        assert_eq!(position.stage, StopStage::Initial);
    }

    #[test]
    fn test_open_long_records_initial_risk() {
        let mut position = Position::flat("BTCUSDT");
        position.open(Side::Long, 100.0, 2.0, 95.0, Utc::now());

        assert!(position.is_open());
        assert_eq!(position.initial_risk, 5.0);
        assert_eq!(position.unrealized(110.0), 20.0);
        assert_eq!(position.unrealized_r(105.0), 1.0);
    }

    #[test]
    fn test_open_short_records_initial_risk() {
        let mut position = Position::flat("ETHUSDT");
        position.open(Side::Short, 100.0, 1.0, 105.0, Utc::now());

        assert_eq!(position.initial_risk, 5.0);
        assert_eq!(position.unrealized(90.0), 10.0);
        assert_eq!(position.unrealized_r(95.0), 1.0);
    }

    #[test]
    fn test_close_keeps_realized_r() {
        let mut position = Position::flat("BTCUSDT");
        position.open(Side::Long, 100.0, 1.0, 95.0, Utc::now());
        position.realized_r += 2.0;
        position.close();

        assert!(!position.is_open());
        assert_eq!(position.realized_r, 2.0);
        assert_eq!(position.quantity, 0.0);
    }
}
