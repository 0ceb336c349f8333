// Core modules
pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod market;
pub mod metrics;
pub mod models;
pub mod retry;
pub mod risk;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{EngineError, ErrorKind};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, error::EngineError>;
