use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::MarketData;
use crate::error::EngineError;
use crate::models::Candle;
use crate::Result;

/// Drift applied to the synthetic random walk
#[derive(Debug, Clone, Copy)]
pub enum Trend {
    /// Steady climb with light noise
    Up,
    /// Steady decline with light noise
    Down,
    /// Mean-reverting chop around the base price
    Sideways,
}

struct WalkState {
    rng: StdRng,
    price: f64,
    base_price: f64,
    index: i64,
}

struct FeedState {
    walks: HashMap<String, WalkState>,
    start_time: DateTime<Utc>,
}

/// Seeded random-walk candle source for paper trading.
///
/// Each symbol gets its own walk so feeds for different symbols do not
/// perturb each other's sequences. Timestamps advance one interval per
/// call, starting from construction time.
#[derive(Clone)]
pub struct SyntheticFeed {
    trend: Trend,
    seed: u64,
    base_price: f64,
    base_volume: f64,
    interval_minutes: i64,
    state: Arc<Mutex<FeedState>>,
}

impl SyntheticFeed {
    pub fn new(trend: Trend, seed: u64) -> Self {
        Self {
            trend,
            seed,
            base_price: 150.0,
            base_volume: 1_000_000.0,
            interval_minutes: 1,
            state: Arc::new(Mutex::new(FeedState {
                walks: HashMap::new(),
                start_time: Utc::now(),
            })),
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    fn next_close(&self, walk: &mut WalkState) -> f64 {
        let change = match self.trend {
            Trend::Up => {
                walk.price * 0.002 + walk.price * walk.rng.gen_range(-0.001..0.001)
            }
            Trend::Down => {
                walk.price * -0.002 + walk.price * walk.rng.gen_range(-0.001..0.001)
            }
            Trend::Sideways => {
                (walk.base_price - walk.price) * 0.1
                    + walk.price * walk.rng.gen_range(-0.01..0.01)
            }
        };
        walk.price = (walk.price + change).max(walk.base_price * 0.01);
        walk.price
    }

    fn build_candle(
        &self,
        symbol: &str,
        close: f64,
        timestamp: DateTime<Utc>,
        walk: &mut WalkState,
    ) -> Candle {
        let rng = &mut walk.rng;
        let noise_pct = 0.002;
        let high = close * (1.0 + rng.gen_range(0.0..noise_pct));
        let low = close * (1.0 - rng.gen_range(0.0..noise_pct));
        let open = (close * (1.0 + rng.gen_range(-noise_pct..noise_pct))).clamp(low, high);
        let volume = self.base_volume * rng.gen_range(0.7..1.3);

        Candle {
            symbol: symbol.to_string(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

#[async_trait::async_trait]
impl MarketData for SyntheticFeed {
    async fn latest_candle(&self, symbol: &str) -> Result<Candle> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let start_time = state.start_time;

        // Symbol name feeds the seed so walks diverge per symbol
        let seed = self
            .seed
            .wrapping_add(symbol.bytes().map(u64::from).sum::<u64>());
        let base_price = self.base_price;
        let walk = state.walks.entry(symbol.to_string()).or_insert_with(|| WalkState {
            rng: StdRng::seed_from_u64(seed),
            price: base_price,
            base_price,
            index: 0,
        });

        let close = self.next_close(walk);
        let timestamp = start_time + Duration::minutes(walk.index * self.interval_minutes);
        walk.index += 1;

        Ok(self.build_candle(symbol, close, timestamp, walk))
    }
}

/// Replays a fixed candle sequence per symbol. Exhaustion is a fatal
/// malformed-data error so tests can bound how many cycles run.
#[derive(Clone, Default)]
pub struct ScriptedFeed {
    queues: Arc<Mutex<HashMap<String, VecDeque<Candle>>>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, candle: Candle) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .entry(candle.symbol.clone())
            .or_default()
            .push_back(candle);
    }

    pub fn extend(&self, candles: impl IntoIterator<Item = Candle>) {
        for candle in candles {
            self.push(candle);
        }
    }

    pub fn remaining(&self, symbol: &str) -> usize {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get(symbol).map_or(0, VecDeque::len)
    }
}

#[async_trait::async_trait]
impl MarketData for ScriptedFeed {
    async fn latest_candle(&self, symbol: &str) -> Result<Candle> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .get_mut(symbol)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| EngineError::Malformed(format!("scripted feed exhausted for {symbol}")))
    }
}
