// Per-symbol trading cycle and the scheduler driving it
pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{CycleOutcome, TradingCycleOrchestrator};
pub use scheduler::{shutdown_channel, Scheduler};
