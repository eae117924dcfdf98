//! Built-in tools and the registry that exposes them to the agent loop.

pub mod file_ops;
pub mod memory;
pub mod patch;
pub mod process;
pub mod profiles;
pub mod registry;
pub mod schema;
pub mod shell;
pub mod traits;
pub mod web;

use std::sync::Arc;

use crate::memory::Memory;
use crate::security::SecurityPolicy;

pub use file_ops::{FileListTool, FileReadTool, FileWriteTool};
pub use memory::{MemoryForgetTool, MemoryRecallTool, MemoryStoreTool};
pub use patch::PatchTool;
pub use process::ProcessTool;
pub use profiles::{ToolGroup, ToolProfile};
pub use registry::ToolRegistry;
pub use shell::ShellTool;
pub use traits::{ArgValidation, ProgressCallback, Tool, ToolContext, ToolInfo, ToolResult, ToolWeight};
pub use web::{WebFetchTool, WebRequestTool, WebSearchTool};

/// Register the built-in tool set, gated by the security policy every
/// tool call runs through, with memory tools backed by `memory`.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    policy: Arc<SecurityPolicy>,
    memory: Arc<dyn Memory>,
) {
    registry.register(Arc::new(ShellTool::new(policy.clone())));
    registry.register(Arc::new(FileReadTool::new(policy.clone())));
    registry.register(Arc::new(FileWriteTool::new(policy.clone())));
    registry.register(Arc::new(FileListTool::new(policy.clone())));
    registry.register(Arc::new(PatchTool::new(policy.clone())));
    registry.register(Arc::new(ProcessTool::new(policy.clone())));
    registry.register(Arc::new(WebFetchTool::new(policy.clone())));
    registry.register(Arc::new(WebRequestTool::new(policy.clone())));
    registry.register(Arc::new(WebSearchTool::new(policy)));
    registry.register(Arc::new(MemoryStoreTool::new(memory.clone())));
    registry.register(Arc::new(MemoryRecallTool::new(memory.clone())));
    registry.register(Arc::new(MemoryForgetTool::new(memory)));
}
