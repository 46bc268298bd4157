use std::{collections::HashMap, sync::Arc};

use super::traits::{DynTool, ToolInfo};

/// Central catalog of callable operations.
///
/// Populated once at startup; wrap in `Arc<ToolRegistry>` and share across
/// every agent loop. Registration overwrites by name, which the orchestration
/// wiring relies on to swap the plain finish tools for their gate-aware
/// variants.
pub struct ToolRegistry {
    tools: HashMap<String, DynTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: DynTool) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<DynTool> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted for stable prompt output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Structured summaries, sorted by name, for inclusion in LLM requests.
    pub fn list(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo { name: t.name().to_string(), description: t.description().to_string(), schema: t.parameters_schema() })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// The documentation view prompt assembly embeds in the system prompt:
    /// one block per tool with its description and argument schema.
    pub fn render_prompt_docs(&self) -> String {
        self.list()
            .into_iter()
            .map(|info| format!("<tool name=\"{}\">\n{}\nArguments: {}\n</tool>", info.name, info.description, info.schema))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
