//! The Tool interface consumed by the agent loop.
//!
//! Grounded on the teacher's `tools::traits::Tool`, extended with `weight`
//! (heavyweight tools run through the [`crate::workers`] pool rather than
//! inline) and the optional `validate`/`get_state_snapshot` hooks the loop
//! calls around every execution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::EngineRegistry;
use crate::memory::Memory;
use crate::security::SecurityPolicy;
use crate::types::CancelToken;

pub use crate::types::{StateSnapshot, ToolResult};

/// Callback a tool uses to report incremental progress back to the loop.
pub type ProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Everything the loop hands a tool at call time: identity, workspace
/// location, the security gate the tool should defer to, cooperative
/// cancellation, a progress-reporting hook, and the optional collaborator
/// backends (memory, sub-agent engines) a tool may reach into.
///
/// Built fresh per call at yield point C in [`crate::agent::loop_`], cheap
/// to clone since every field is itself a handle (`Arc`/`String`/`CancelToken`).
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    /// Home-sanitised working directory (see `sanitize_workspace_path`).
    pub cwd: String,
    pub security_policy: Arc<SecurityPolicy>,
    pub cancel: CancelToken,
    pub on_progress: Option<ProgressCallback>,
    pub memory: Option<Arc<dyn Memory>>,
    pub engine_registry: Option<Arc<EngineRegistry>>,
    pub extensions: HashMap<String, Value>,
}

impl ToolContext {
    /// Send a progress update, if the loop registered a listener.
    pub fn report_progress(&self, update: impl Into<String>) {
        if let Some(cb) = &self.on_progress {
            cb(update.into());
        }
    }
}

/// Where a tool's default execution venue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolWeight {
    /// Runs inline on the loop's logical thread.
    Lightweight,
    /// Runs through the worker pool, subject to its timeout/cancellation.
    Heavyweight,
}

/// Outcome of [`Tool::validate`].
#[derive(Debug, Clone, Default)]
pub struct ArgValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ArgValidation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// A capability the agent loop can invoke.
///
/// Implementations must be `Send + Sync` so they can be held in a shared
/// `Arc<dyn Tool>` registry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier (snake_case), e.g. `"shell"`.
    fn name(&self) -> &str;

    /// Human-readable description used in engine tool-use payloads.
    fn description(&self) -> &str;

    /// JSON Schema object describing the tool's accepted parameters.
    fn parameters_schema(&self) -> Value;

    /// Default execution venue. Lightweight unless overridden.
    fn weight(&self) -> ToolWeight {
        ToolWeight::Lightweight
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, String>;

    /// Validate `args` before execution. The loop's fallback when this
    /// returns `None`: `args` must be null or a JSON object, never an array.
    fn validate(&self, _args: &Value) -> Option<ArgValidation> {
        None
    }

    /// Capture a best-effort state snapshot before/after a mutating call.
    /// Returning `None` is always acceptable; a failure here is never fatal.
    async fn get_state_snapshot(&self, _args: &Value, _ctx: &ToolContext) -> Option<StateSnapshot> {
        None
    }
}

/// The loop's fallback argument check when a tool has no `validate` hook:
/// args must be absent, null, or a plain JSON object.
pub fn default_validate(args: &Value) -> ArgValidation {
    match args {
        Value::Null => ArgValidation::ok(),
        Value::Object(_) => ArgValidation::ok(),
        _ => ArgValidation::invalid(vec!["Arguments must be an object.".to_string()]),
    }
}

/// Summary of a registered tool, suitable for inclusion in engine requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// A bare-minimum [`ToolContext`] for unit tests across the `tools` module
/// that don't exercise context-dependent behaviour.
#[cfg(test)]
pub(crate) fn test_context() -> ToolContext {
    ToolContext {
        session_id: "test".into(),
        cwd: ".".into(),
        security_policy: Arc::new(SecurityPolicy::new(
            crate::security::AutonomyLevel::Full,
            None,
            Vec::new(),
            3600,
            1000,
        )),
        cancel: CancelToken::new(),
        on_progress: None,
        memory: None,
        engine_registry: None,
        extensions: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validate_accepts_object_and_null() {
        assert!(default_validate(&Value::Null).valid);
        assert!(default_validate(&serde_json::json!({"a": 1})).valid);
    }

    #[test]
    fn default_validate_rejects_array() {
        let v = default_validate(&serde_json::json!([1, 2]));
        assert!(!v.valid);
        assert_eq!(v.errors.len(), 1);
    }
}
