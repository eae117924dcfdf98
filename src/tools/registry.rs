use std::{collections::HashMap, sync::Arc};

use super::profiles::ToolProfile;
use super::traits::{Tool, ToolContext, ToolInfo};

/// Central registry of available tools.
///
/// Wrap in `Arc<Mutex<ToolRegistry>>` if registration must happen post-startup;
/// for a one-time setup at app launch, `Arc<ToolRegistry>` with a fully
/// populated registry is sufficient.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.  Overwrites any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tools (for inclusion in LLM `tools` arrays).
    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                schema: t.parameters_schema(),
            })
            .collect()
    }

    /// List tools filtered by a tool profile.
    ///
    /// Returns only the tools that are allowed by the given profile.
    pub fn list_filtered(&self, profile: ToolProfile) -> Vec<ToolInfo> {
        self.tools
            .values()
            .filter(|t| profile.is_tool_allowed(t.name()))
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                schema: t.parameters_schema(),
            })
            .collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Iterate over all registered tools (unfiltered).
    ///
    /// Returns an iterator yielding `(name, tool)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn Tool>)> {
        self.tools.iter()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
