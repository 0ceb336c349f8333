use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::{atr, moving_average};
use crate::models::Candle;

/// Indicator kinds the cache knows how to maintain incrementally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorKind {
    Sma,
    Ema,
    Atr,
}

impl IndicatorKind {
    /// Candles required before a value exists for the given window
    fn min_candles(&self, window: usize) -> usize {
        match self {
            // ATR needs one extra candle for the first previous close
            IndicatorKind::Atr => window + 1,
            _ => window,
        }
    }
}

/// Cache key derived from stable metadata only.
///
/// Never key on candle contents: a content hash changes every candle and
/// turns the cache into a permanent miss.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub kind: IndicatorKind,
    pub window: usize,
}

/// Aggregate cache counters for the metrics sink
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub evictions: u64,
}

/// Sliding candle window for one symbol.
///
/// Appends shift the contents left in place (O(window), allocation-free
/// after warmup) rather than reallocating a new buffer per candle.
struct SymbolWindow {
    candles: Vec<Candle>,
    capacity: usize,
    /// Total candles accepted since startup; identifies "the current candle"
    index: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl SymbolWindow {
    fn new(capacity: usize) -> Self {
        Self {
            candles: Vec::with_capacity(capacity),
            capacity,
            index: 0,
            last_timestamp: None,
        }
    }

    /// Accept a candle if it is newer than the last one seen. Repeat calls
    /// with the same candle (one per indicator per cycle) are no-ops.
    fn push(&mut self, candle: &Candle) -> bool {
        if let Some(last) = self.last_timestamp {
            if candle.timestamp <= last {
                return false;
            }
        }
        if self.candles.len() == self.capacity {
            self.candles.rotate_left(1);
            if let Some(slot) = self.candles.last_mut() {
                *slot = candle.clone();
            }
        } else {
            self.candles.push(candle.clone());
        }
        self.last_timestamp = Some(candle.timestamp);
        self.index += 1;
        true
    }

    fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }
}

/// Per-entry incremental state
#[derive(Debug, Clone, Copy)]
enum EntryState {
    /// Rolling sum of the closes inside the window
    SmaSum(f64),
    /// EMA and ATR carry their state in the value itself
    Carryover,
}

struct CacheEntry {
    value: f64,
    state: EntryState,
    /// Candle index the value was computed at
    last_index: u64,
    hits: u64,
    misses: u64,
    /// LRU clock tick of the last access
    touched: u64,
}

/// Memoized values, LRU state and counters, shared across symbols
struct Book {
    entries: HashMap<CacheKey, CacheEntry>,
    ma_cap: usize,
    atr_cap: usize,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Book {
    fn kind_cap(&self, kind: IndicatorKind) -> usize {
        match kind {
            IndicatorKind::Atr => self.atr_cap,
            _ => self.ma_cap,
        }
    }

    /// Drop the least-recently-touched entry of this kind if at capacity
    fn evict_for(&mut self, kind: IndicatorKind) {
        let cap = self.kind_cap(kind);
        let count = self.entries.keys().filter(|k| k.kind == kind).count();
        if count < cap {
            return;
        }
        let victim = self
            .entries
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .min_by_key(|(_, e)| e.touched)
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
            self.evictions += 1;
        }
    }
}

/// Memoizes windowed indicator values per (symbol, kind, window).
///
/// One instance per engine; clones share state. Symbol windows are sharded
/// behind their own locks so workers feeding different symbols compute in
/// parallel; the shared bookkeeping lock covers only the hit check and the
/// eviction/store sections, never a computation.
#[derive(Clone)]
pub struct IndicatorCache {
    windows: Arc<RwLock<HashMap<String, Arc<Mutex<SymbolWindow>>>>>,
    book: Arc<Mutex<Book>>,
    candle_capacity: usize,
}

impl IndicatorCache {
    pub fn new(candle_capacity: usize) -> Self {
        Self::with_caps(candle_capacity, 50, 25)
    }

    /// `ma_cap` bounds SMA and EMA entries each; `atr_cap` bounds ATR entries.
    /// Sized small on purpose: cardinality is symbols x distinct windows.
    pub fn with_caps(candle_capacity: usize, ma_cap: usize, atr_cap: usize) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            book: Arc::new(Mutex::new(Book {
                entries: HashMap::new(),
                ma_cap: ma_cap.max(1),
                atr_cap: atr_cap.max(1),
                clock: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            })),
            candle_capacity: candle_capacity.max(2),
        }
    }

    fn window_handle(&self, symbol: &str) -> Arc<Mutex<SymbolWindow>> {
        {
            let map = self.windows.read().unwrap_or_else(|e| e.into_inner());
            if let Some(handle) = map.get(symbol) {
                return Arc::clone(handle);
            }
        }
        let mut map = self.windows.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(symbol.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SymbolWindow::new(self.candle_capacity)))),
        )
    }

    /// Feed the latest candle and return the indicator value for it.
    ///
    /// Returns None while fewer candles than the window requires have been
    /// seen — callers treat that as "cannot signal yet", not as a fault.
    pub fn get_or_compute(
        &self,
        symbol: &str,
        kind: IndicatorKind,
        window: usize,
        candle: &Candle,
    ) -> Option<f64> {
        if window == 0 {
            return None;
        }
        let handle = self.window_handle(symbol);
        let mut w = handle.lock().unwrap_or_else(|e| e.into_inner());
        w.push(candle);
        let index = w.index;
        let len = w.candles.len();

        if len < kind.min_candles(window) {
            return None;
        }

        let key = CacheKey {
            symbol: symbol.to_string(),
            kind,
            window,
        };

        // Hit check under the bookkeeping lock only
        let prior = {
            let mut book = self.book.lock().unwrap_or_else(|e| e.into_inner());
            let book = &mut *book;
            book.clock += 1;
            let clock = book.clock;
            match book.entries.get_mut(&key) {
                Some(entry) if entry.last_index == index => {
                    entry.hits += 1;
                    entry.touched = clock;
                    book.hits += 1;
                    return Some(entry.value);
                }
                Some(entry) => Some((entry.last_index, entry.value, entry.state)),
                None => None,
            }
        };

        // Miss: compute under this symbol's window lock alone, advancing
        // incrementally from the previous candle when possible, otherwise
        // rescanning the window
        let consecutive = matches!(prior, Some((last, _, _)) if last + 1 == index);
        let (value, state) = match kind {
            IndicatorKind::Sma => {
                let incremental = match prior {
                    Some((_, _, EntryState::SmaSum(sum))) if consecutive && len > window => {
                        let newest = w.candles[len - 1].close;
                        let dropped = w.candles[len - 1 - window].close;
                        Some(sum + newest - dropped)
                    }
                    _ => None,
                };
                let sum = incremental.unwrap_or_else(|| {
                    w.candles[len - window..].iter().map(|c| c.close).sum()
                });
                (sum / window as f64, EntryState::SmaSum(sum))
            }
            IndicatorKind::Ema => {
                let value = match prior {
                    Some((_, prev, _)) if consecutive => {
                        let k = moving_average::ema_multiplier(window);
                        (w.candles[len - 1].close - prev) * k + prev
                    }
                    _ => moving_average::calculate_ema(&w.closes(), window)?,
                };
                (value, EntryState::Carryover)
            }
            IndicatorKind::Atr => {
                let value = match prior {
                    Some((_, prev, _)) if consecutive && len >= 2 => {
                        let tr =
                            atr::true_range(&w.candles[len - 1], w.candles[len - 2].close);
                        atr::wilder_step(prev, tr, window)
                    }
                    _ => atr::calculate_atr(&w.candles, window)?,
                };
                (value, EntryState::Carryover)
            }
        };

        // Store and evict under the bookkeeping lock
        let mut book = self.book.lock().unwrap_or_else(|e| e.into_inner());
        let book = &mut *book;
        book.clock += 1;
        let clock = book.clock;
        book.misses += 1;
        if !book.entries.contains_key(&key) {
            book.evict_for(kind);
            book.entries.insert(
                key.clone(),
                CacheEntry {
                    value,
                    state,
                    last_index: index,
                    hits: 0,
                    misses: 0,
                    touched: clock,
                },
            );
        }
        if let Some(entry) = book.entries.get_mut(&key) {
            entry.value = value;
            entry.state = state;
            entry.last_index = index;
            entry.misses += 1;
            entry.touched = clock;
        }
        Some(value)
    }

    pub fn stats(&self) -> CacheStats {
        let book = self.book.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            hits: book.hits,
            misses: book.misses,
            entries: book.entries.len(),
            evictions: book.evictions,
        }
    }

    /// Hit/miss counters for one entry, if present
    pub fn entry_counters(&self, key: &CacheKey) -> Option<(u64, u64)> {
        let book = self.book.lock().unwrap_or_else(|e| e.into_inner());
        book.entries.get(key).map(|e| (e.hits, e.misses))
    }

    pub fn candle_count(&self, symbol: &str) -> usize {
        let map = self.windows.read().unwrap_or_else(|e| e.into_inner());
        map.get(symbol).map_or(0, |w| {
            w.lock().unwrap_or_else(|e| e.into_inner()).candles.len()
        })
    }

    /// Drop memoized values but keep the candle windows. The next lookup per
    /// key recomputes from scratch.
    pub fn clear_entries(&self) {
        let mut book = self.book.lock().unwrap_or_else(|e| e.into_inner());
        book.entries.clear();
    }
}
