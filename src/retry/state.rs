use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use crate::error::{EngineError, ErrorKind};

/// Progress record for one logical multi-step operation.
///
/// Serialized after every completed step so a crash mid-operation (for
/// example between cancelling an old stop order and placing the new one)
/// resumes instead of replaying the whole sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryState {
    pub operation_id: String,
    pub completed_steps: usize,
    pub attempt_count: u32,
    /// Backoff to apply before the first attempt after a resume
    pub next_delay_ms: u64,
    pub last_error_kind: Option<ErrorKind>,
}

impl RetryState {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            completed_steps: 0,
            attempt_count: 0,
            next_delay_ms: 0,
            last_error_kind: None,
        }
    }
}

/// External collaborator persisting retry progress
pub trait StateStore: Send + Sync {
    fn load(&self, operation_id: &str) -> Option<RetryState>;
    fn save(&self, state: &RetryState);
    fn clear(&self, operation_id: &str);
}

/// Volatile store; progress survives within the process only
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<RwLock<HashMap<String, RetryState>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn load(&self, operation_id: &str) -> Option<RetryState> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.get(operation_id).cloned()
    }

    fn save(&self, state: &RetryState) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.insert(state.operation_id.clone(), state.clone());
    }

    fn clear(&self, operation_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.remove(operation_id);
    }
}

/// One JSON file per operation under a base directory; survives restarts.
/// Store failures are logged and swallowed — losing a progress record costs
/// a replayed idempotent step, never a crashed cycle.
pub struct JsonFileStateStore {
    dir: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, operation_id: &str) -> PathBuf {
        // Operation ids are generated internally (uuid-based); sanitize
        // anyway so a caller-supplied id cannot escape the directory
        let safe: String = operation_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl StateStore for JsonFileStateStore {
    fn load(&self, operation_id: &str) -> Option<RetryState> {
        let bytes = std::fs::read(self.path_for(operation_id)).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(state) => Some(state),
            Err(err) => {
                tracing::warn!(operation_id, %err, "discarding corrupt retry state");
                None
            }
        }
    }

    fn save(&self, state: &RetryState) {
        if let Err(err) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(%err, "failed to create retry state dir");
            return;
        }
        match serde_json::to_vec_pretty(state) {
            Ok(bytes) => {
                if let Err(err) = std::fs::write(self.path_for(&state.operation_id), bytes) {
                    tracing::warn!(operation_id = %state.operation_id, %err, "failed to save retry state");
                }
            }
            Err(err) => {
                tracing::warn!(operation_id = %state.operation_id, %err, "failed to serialize retry state");
            }
        }
    }

    fn clear(&self, operation_id: &str) {
        let _ = std::fs::remove_file(self.path_for(operation_id));
    }
}

type StepFuture = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send>>;

/// One idempotent step of a multi-step broker operation
pub struct OperationStep {
    name: String,
    run: Box<dyn Fn() -> StepFuture + Send + Sync>,
}

impl OperationStep {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(move || Box::pin(f())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn run(&self) -> StepFuture {
        (self.run)()
    }
}
