//! Conversation messages exchanged between the agent, the model, and tools.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

/// The outcome of a tool invocation, paired with the call that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub name: String,
    pub output: Value,
    #[serde(default)]
    pub error: bool,
}

/// One turn in a conversation. Immutable once appended to history.
///
/// `persist` controls whether the message is written to session storage;
/// reasoning traces set it to `false` so they appear in the live prompt but
/// never in persisted history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default = "default_persist")]
    pub persist: bool,
    /// Provider-injected metadata that rides along with the message
    /// (e.g. raw Gemini `parts`). Stripped before persistence.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

fn default_persist() -> bool {
    true
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_result: None,
            reasoning_content: None,
            persist: true,
            extra: Map::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// A `role=tool` message carrying the result of `call`.
    pub fn tool(call: &ToolCall, output: Value, error: bool) -> Self {
        let mut message = Self::with_role(Role::Tool, String::new());
        message.tool_result = Some(ToolResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            output,
            error,
        });
        message
    }

    /// Marks the message as live-prompt-only; it will not reach storage.
    pub fn transient(mut self) -> Self {
        self.persist = false;
        self
    }

    /// Storage form of the message, or `None` for transient messages.
    ///
    /// Gemini injects a non-serializable-friendly `parts` blob into `extra`;
    /// it is dropped here so every backend stores the same shape.
    pub fn sanitized_for_storage(&self) -> Option<Message> {
        if !self.persist {
            return None;
        }
        let mut message = self.clone();
        message.extra.remove("parts");
        Some(message)
    }
}
