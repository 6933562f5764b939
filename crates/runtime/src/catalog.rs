//! Tool catalog: cached tool descriptors per host.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// A tool definition exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Check one host's discovery result before it is cached.
///
/// Returns a description of the first problem found.
pub fn validate(tools: &[ToolDescriptor]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for tool in tools {
        if tool.name.trim().is_empty() {
            return Err("tool with empty name".into());
        }
        if !tool.input_schema.is_object() {
            return Err(format!("tool {} has a non-object input schema", tool.name));
        }
        if !seen.insert(tool.name.as_str()) {
            return Err(format!("duplicate tool name {}", tool.name));
        }
    }
    Ok(())
}

/// Tool descriptors keyed by host, in host registration order.
///
/// Each entry is a complete snapshot of one successful discovery call.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<(String, Vec<ToolDescriptor>)>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a host's entry wholesale, keeping its position if it existed.
    pub(crate) fn replace(&mut self, host: &str, tools: Vec<ToolDescriptor>) {
        for tool in &tools {
            if let Some(owner) = self.resolve(&tool.name).filter(|owner| *owner != host) {
                tracing::warn!(
                    tool = %tool.name,
                    host,
                    owner,
                    "tool name already provided by another host; calls route to {owner}"
                );
            }
        }

        match self.entries.iter_mut().find(|(id, _)| id == host) {
            Some((_, existing)) => *existing = tools,
            None => self.entries.push((host.to_string(), tools)),
        }
    }

    pub(crate) fn remove(&mut self, host: &str) {
        self.entries.retain(|(id, _)| id != host);
    }

    /// Tools cached for one host, if discovery has succeeded for it.
    pub fn host(&self, host: &str) -> Option<&[ToolDescriptor]> {
        self.entries
            .iter()
            .find(|(id, _)| id == host)
            .map(|(_, tools)| tools.as_slice())
    }

    pub fn contains(&self, host: &str, tool: &str) -> bool {
        self.host(host)
            .is_some_and(|tools| tools.iter().any(|t| t.name == tool))
    }

    /// The host that serves `tool`. The first registered host wins on collisions.
    pub fn resolve(&self, tool: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, tools)| tools.iter().any(|t| t.name == tool))
            .map(|(id, _)| id.as_str())
    }

    /// All descriptors across hosts, shadowed duplicates removed.
    pub fn flatten(&self) -> Vec<ToolDescriptor> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .flat_map(|(_, tools)| tools.iter())
            .filter(|tool| seen.insert(tool.name.as_str()))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, tools)| tools.is_empty())
    }
}
