// Position sizing and stop management
pub mod sizing;
pub mod trailing;

pub use crate::indicators::calculate_atr;
pub use sizing::{initial_stop, position_size};
pub use trailing::{advance_trailing_stop, StopAction, TrailParams};
