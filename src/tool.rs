//! Tool interface and the registry that advertises tools to the model.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{AgentError, Result};
use crate::hooks::ToolHook;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the tool's arguments, if it takes any.
    fn parameters(&self) -> Option<Value> {
        None
    }
    async fn call(&self, input: Value) -> Result<Value>;
}

/// The machine-readable descriptor advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Per-registration behavior flags and hooks.
#[derive(Clone, Default)]
pub struct ToolOptions {
    /// End the run after this tool executes. The result is not sent back to
    /// the model, which leaves the final response content empty.
    pub stop_after_call: bool,
    /// Surface the tool's output in the `ToolCallCompleted` event.
    pub show_result: bool,
    pub hook: Option<Arc<dyn ToolHook>>,
}

impl ToolOptions {
    pub fn stop_after_call(mut self) -> Self {
        self.stop_after_call = true;
        self
    }

    pub fn show_result(mut self) -> Self {
        self.show_result = true;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn ToolHook>) -> Self {
        self.hook = Some(hook);
        self
    }
}

/// A tool plus the options it was registered with.
#[derive(Clone)]
pub struct RegisteredTool {
    tool: Arc<dyn Tool>,
    pub options: ToolOptions,
}

impl RegisteredTool {
    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    pub fn description(&self) -> ToolDescription {
        ToolDescription {
            name: self.tool.name().to_string(),
            description: self.tool.description().to_string(),
            parameters: self.tool.parameters(),
        }
    }

    pub async fn invoke(&self, input: Value) -> Result<Value> {
        self.tool.call(input).await.map_err(|source| match source {
            err @ AgentError::ToolInvocation { .. } => err,
            other => AgentError::ToolInvocation {
                name: self.tool.name().to_string(),
                source: Box::new(other),
            },
        })
    }
}

/// A named collection of tools exposed to the model as one unit.
///
/// Registering a name twice overwrites the earlier descriptor
/// (last-registration-wins); the overwrite is logged, not rejected.
pub struct Toolkit {
    name: String,
    functions: BTreeMap<String, RegisteredTool>,
}

impl Toolkit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_with(tool, ToolOptions::default());
    }

    pub fn register_with<T: Tool + 'static>(&mut self, tool: T, options: ToolOptions) {
        let key = tool.name().to_string();
        let entry = RegisteredTool {
            tool: Arc::new(tool),
            options,
        };
        if self.functions.insert(key.clone(), entry).is_some() {
            warn!(toolkit = %self.name, tool = %key, "re-registered tool, previous descriptor replaced");
        }
    }

    pub fn functions(&self) -> &BTreeMap<String, RegisteredTool> {
        &self.functions
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.functions.get(name)
    }
}

/// The agent-side aggregation of toolkits and loose tools.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    entries: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_toolkit(&mut self, toolkit: Toolkit) {
        for (name, entry) in toolkit.functions {
            if self.entries.insert(name.clone(), entry).is_some() {
                warn!(tool = %name, "tool name collision across toolkits, previous descriptor replaced");
            }
        }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_with(tool, ToolOptions::default());
    }

    pub fn register_with<T: Tool + 'static>(&mut self, tool: T, options: ToolOptions) {
        let key = tool.name().to_string();
        let entry = RegisteredTool {
            tool: Arc::new(tool),
            options,
        };
        if self.entries.insert(key.clone(), entry).is_some() {
            warn!(tool = %key, "re-registered tool, previous descriptor replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn descriptions(&self) -> Vec<ToolDescription> {
        self.entries.values().map(RegisteredTool::description).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the provided JSON payload back to the caller."
        }

        async fn call(&self, input: Value) -> Result<Value> {
            Ok(json!({ "echo": input }))
        }
    }

    struct LoudEchoTool;

    #[async_trait]
    impl Tool for LoudEchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the payload, uppercased."
        }

        async fn call(&self, input: Value) -> Result<Value> {
            Ok(json!({ "echo": input.to_string().to_uppercase() }))
        }
    }

    #[tokio::test]
    async fn registered_descriptor_dispatches_to_the_instance() {
        let mut toolkit = Toolkit::new("test");
        toolkit.register(EchoTool);

        let entry = toolkit.functions().get("echo").unwrap();
        assert_eq!(entry.description().name, "echo");

        let output = entry.invoke(json!({"text": "ping"})).await.unwrap();
        assert_eq!(output, json!({"echo": {"text": "ping"}}));
    }

    #[tokio::test]
    async fn reregistering_a_name_overwrites_the_descriptor() {
        let mut toolkit = Toolkit::new("test");
        toolkit.register(EchoTool);
        toolkit.register(LoudEchoTool);

        assert_eq!(toolkit.functions().len(), 1);
        let entry = toolkit.get("echo").unwrap();
        assert_eq!(entry.description().description, "Echo the payload, uppercased.");
    }

    #[test]
    fn registry_descriptions_are_deterministically_ordered() {
        let mut a = Toolkit::new("a");
        a.register(EchoTool);
        let mut registry = ToolRegistry::new();
        registry.add_toolkit(a);

        assert_eq!(registry.names(), vec!["echo".to_string()]);
        assert_eq!(registry.descriptions().len(), 1);
    }
}
