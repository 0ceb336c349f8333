// Market data boundary
pub mod synthetic;

pub use synthetic::{ScriptedFeed, SyntheticFeed, Trend};

use async_trait::async_trait;

use crate::models::Candle;
use crate::Result;

/// Source of closed candles. One candle per symbol per call; the engine
/// polls this once per cycle.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn latest_candle(&self, symbol: &str) -> Result<Candle>;
}
