//! Memory tools: the agent loop's only path to `store`/`recall`/`forget`.
//!
//! Thin wrappers over [`crate::memory::Memory`], following the same
//! `Tool` shape as the file and process tools in this module.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::memory::{Memory, MemoryCategory};

use super::traits::{Tool, ToolContext, ToolResult};
#[cfg(test)]
use super::traits::test_context;

fn category_from_str(s: Option<&str>) -> MemoryCategory {
    match s {
        Some("daily") => MemoryCategory::Daily,
        Some("conversation") => MemoryCategory::Conversation,
        Some("core") | None => MemoryCategory::Core,
        Some(other) => MemoryCategory::Custom(other.to_string()),
    }
}

// ─── MemoryStoreTool ──────────────────────────────────────────────────────────

pub struct MemoryStoreTool {
    memory: Arc<dyn Memory>,
}

impl MemoryStoreTool {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryStoreTool {
    fn name(&self) -> &str {
        "memory_store"
    }

    fn description(&self) -> &str {
        "Store a fact under a namespaced key for later recall (e.g. \"user:name\", \"project:goal\")."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "Namespaced lookup key." },
                "content": { "type": "string", "description": "The fact to remember." },
                "category": {
                    "type": "string",
                    "description": "One of \"core\", \"daily\", \"conversation\", or a custom label.",
                }
            },
            "required": ["key", "content"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
        let key = args.get("key").and_then(Value::as_str).ok_or("missing required argument 'key'")?;
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'content'")?;
        let category = category_from_str(args.get("category").and_then(Value::as_str));

        self.memory.store(key, content, category).await?;
        Ok(ToolResult::ok(format!("stored '{key}'")))
    }
}

// ─── MemoryRecallTool ─────────────────────────────────────────────────────────

pub struct MemoryRecallTool {
    memory: Arc<dyn Memory>,
}

impl MemoryRecallTool {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryRecallTool {
    fn name(&self) -> &str {
        "memory_recall"
    }

    fn description(&self) -> &str {
        "Search stored memories for entries relevant to a query, most relevant first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search text." },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of entries to return (default 10).",
                    "minimum": 1
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
        let query = args.get("query").and_then(Value::as_str).ok_or("missing required argument 'query'")?;
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;

        let entries = self.memory.recall(query, limit).await?;
        let output = serde_json::to_string_pretty(&entries).map_err(|e| e.to_string())?;
        Ok(ToolResult::ok(output).with_metadata(json!({ "count": entries.len() })))
    }
}

// ─── MemoryForgetTool ─────────────────────────────────────────────────────────

pub struct MemoryForgetTool {
    memory: Arc<dyn Memory>,
}

impl MemoryForgetTool {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryForgetTool {
    fn name(&self) -> &str {
        "memory_forget"
    }

    fn description(&self) -> &str {
        "Remove a stored memory by its key."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "The key to remove." }
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
        let key = args.get("key").and_then(Value::as_str).ok_or("missing required argument 'key'")?;
        let removed = self.memory.forget(key).await?;
        Ok(ToolResult::ok(format!("forgot '{key}': {removed}"))
            .with_metadata(json!({ "removed": removed })))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
