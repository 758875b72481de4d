//! Run-level output types: events, responses, and per-run metrics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ToolCall, ToolResult};

/// Lifecycle tag carried by every [`RunResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted,
    ReasoningStarted,
    ReasoningCompleted,
    ToolCallStarted,
    ToolCallCompleted,
    RunCompleted,
}

/// Wall-clock accounting for a single run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub duration_ms: u64,
    /// Per-tool execution times, in call order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_call_times_ms: BTreeMap<String, Vec<u64>>,
    pub model_requests: u32,
}

impl RunMetrics {
    pub fn record_tool_call(&mut self, name: &str, elapsed_ms: u64) {
        self.tool_call_times_ms
            .entry(name.to_string())
            .or_default()
            .push(elapsed_ms);
    }
}

/// One unit of agent output. A non-streaming run yields a single
/// `RunCompleted` response; a streaming run yields one response per event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub run_id: String,
    pub session_id: String,
    pub event: RunEvent,
    /// Final text for `RunCompleted`; `None` when a `stop_after_call` tool
    /// ended the run before the model produced a closing turn.
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<RunMetrics>,
}

impl RunResponse {
    pub fn event(run_id: &str, session_id: &str, event: RunEvent) -> Self {
        Self {
            run_id: run_id.to_string(),
            session_id: session_id.to_string(),
            event,
            content: None,
            tool_calls: Vec::new(),
            tool_result: None,
            reasoning_content: None,
            metrics: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_tool_result(mut self, result: ToolResult) -> Self {
        self.tool_result = Some(result);
        self
    }

    /// The response rendered as plain text, for the CLI and logs.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
