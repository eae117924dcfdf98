//! Unified error taxonomy for the agent core.
//!
//! Each subsystem gets its own small `thiserror` enum; [`CoreError`] composes
//! them with `#[from]` so call sites can use `?` without manual `map_err`.

use thiserror::Error;

/// Tool argument validation failed. Never terminates a run.
#[derive(Debug, Error, Clone)]
#[error("validation error: {0}")]
pub struct ValidationError(pub String);

/// A security policy denial.
#[derive(Debug, Error, Clone)]
#[error("security error: {0}")]
pub struct SecurityError(pub String);

/// Engine start or stream failure.
#[derive(Debug, Error, Clone)]
#[error("engine error: {message}")]
pub struct EngineError {
    pub message: String,
    pub retryable: bool,
}

impl EngineError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Unknown tool or tool-execution exception.
#[derive(Debug, Error, Clone)]
#[error("tool error: {0}")]
pub struct ToolError(pub String);

/// Worker-pool timeout.
#[derive(Debug, Error, Clone)]
#[error("timeout after {0:?}")]
pub struct TimeoutError(pub std::time::Duration);

/// Cooperative cancellation.
#[derive(Debug, Error, Clone)]
#[error("aborted: {0}")]
pub struct AbortError(pub String);

/// Configuration-layer failure. Produced by collaborators.
#[derive(Debug, Error, Clone)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);

/// Channel-transport failure. Produced by collaborators.
#[derive(Debug, Error, Clone)]
#[error("channel error: {0}")]
pub struct ChannelError(pub String);

/// Memory-backend failure. Produced by collaborators.
#[derive(Debug, Error, Clone)]
#[error("memory error: {0}")]
pub struct MemoryError(pub String);

/// Top-level error type threaded through the agent core.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Security(#[from] SecurityError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Abort(#[from] AbortError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl CoreError {
    /// Whether this error represents a condition the agent loop should retry
    /// with backoff rather than terminate the run.
    pub fn retryable(&self) -> bool {
        matches!(self, CoreError::Engine(e) if e.retryable)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_retryable_flag_propagates() {
        let e: CoreError = EngineError::retryable("rate limited").into();
        assert!(e.retryable());

        let e: CoreError = EngineError::fatal("bad api key").into();
        assert!(!e.retryable());
    }

    #[test]
    fn non_engine_errors_are_never_retryable() {
        let e: CoreError = ToolError("boom".into()).into();
        assert!(!e.retryable());
    }
}
