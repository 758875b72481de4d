//! Tool-call hooks.
//!
//! Hooks steer the run loop with a tagged decision instead of control-flow
//! exceptions: `Retry` re-issues the same tool call without a model
//! round-trip, `Stop` aborts the run with optional substitute messages.

use async_trait::async_trait;

use crate::message::{ToolCall, ToolResult};

#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    Proceed,
    /// Re-issue the same tool call, optionally appending a corrective user
    /// message to the conversation first.
    Retry { message: Option<String> },
    /// Abort the run immediately. `user_message`/`agent_message` are appended
    /// to history in place of a final model turn.
    Stop {
        user_message: Option<String>,
        agent_message: Option<String>,
    },
}

#[async_trait]
pub trait ToolHook: Send + Sync {
    async fn before_call(&self, _call: &ToolCall) -> HookDecision {
        HookDecision::Proceed
    }

    async fn after_call(&self, _call: &ToolCall, _result: &ToolResult) -> HookDecision {
        HookDecision::Proceed
    }
}
