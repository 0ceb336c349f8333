use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Classification of an engine error, decided once at the collaborator
/// boundary. Internal logic branches on this tag, never on error strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Transient network-shaped failure, safe to retry.
    Retryable,
    /// Bad parameters, auth, funds, malformed data. Never retried.
    Fatal,
    /// Not enough candles for the requested window. Skip the cycle.
    DataInsufficient,
}

/// Closed error taxonomy for the trading engine.
///
/// Every fallible collaborator call maps into one of these variants, so the
/// retry layer and the orchestrator can classify failures without inspecting
/// the underlying transport.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("insufficient funds: need {needed:.2}, have {available:.2}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("not enough candles: have {have}, need {need}")]
    DataInsufficient { have: usize, need: usize },

    #[error("invalid risk parameters: {0}")]
    InvalidRisk(String),

    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Connection(_)
            | EngineError::Timeout(_)
            | EngineError::RateLimited(_) => ErrorKind::Retryable,
            EngineError::DataInsufficient { .. } => ErrorKind::DataInsufficient,
            EngineError::InvalidParameter(_)
            | EngineError::Auth(_)
            | EngineError::InsufficientFunds { .. }
            | EngineError::Malformed(_)
            | EngineError::InvalidRisk(_)
            | EngineError::RetriesExhausted { .. } => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_retryable() {
        assert!(EngineError::Connection("reset by peer".into()).is_retryable());
        assert!(EngineError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(EngineError::RateLimited("429".into()).is_retryable());
    }

    #[test]
    fn test_parameter_errors_are_fatal() {
        assert_eq!(
            EngineError::InvalidParameter("qty=0".into()).kind(),
            ErrorKind::Fatal
        );
        assert_eq!(
            EngineError::InsufficientFunds {
                needed: 100.0,
                available: 5.0
            }
            .kind(),
            ErrorKind::Fatal
        );
        assert_eq!(EngineError::Auth("bad key".into()).kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_data_insufficient_is_its_own_kind() {
        let err = EngineError::DataInsufficient { have: 5, need: 14 };
        assert_eq!(err.kind(), ErrorKind::DataInsufficient);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_exhausted_wrapper_is_fatal_and_keeps_source() {
        let err = EngineError::RetriesExhausted {
            attempts: 4,
            source: Box::new(EngineError::Timeout(Duration::from_secs(1))),
        };
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.to_string().contains("4 attempts"));
    }
}
