//! Building blocks for tool-using language model agents.
//!
//! The crate provides:
//! - A provider abstraction (`LanguageModel`) with OpenAI, Anthropic, Gemini,
//!   and Groq clients, plus a scripted `StubModel` for tests.
//! - A tool interface (`Tool`, `Toolkit`, `ToolRegistry`) with per-tool
//!   options and hooks that can retry or stop a run.
//! - An `Agent` run loop that alternates between the model and tools, with
//!   optional chain-of-thought reasoning delegated to a second model.
//! - Session persistence (`SessionStorage`) over memory, JSON/YAML files, or
//!   sqlite.

mod agent;
mod cli;
mod config;
mod error;
mod hooks;
mod llm;
mod memory;
mod message;
mod reasoning;
mod run;
mod storage;
mod tool;
pub mod toolkits;

pub use agent::Agent;
pub use cli::init_tracing;
pub use config::{AgentConfig, AppConfig, ModelConfig, StorageBackend, StorageConfig};
pub use error::{AgentError, Result};
pub use hooks::{HookDecision, ToolHook};
pub use llm::{
    AnthropicClient, FailingModel, GeminiClient, GroqClient, LanguageModel, ModelCompletion,
    OpenAIClient, StubModel,
};
pub use memory::{AgentSession, ConversationMemory};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use reasoning::{
    extract_think_tags, reasoning_system_prompt, NextAction, ReasoningConfig, ReasoningDelegate,
    ReasoningStep, ReasoningSteps,
};
pub use run::{RunEvent, RunMetrics, RunResponse};
pub use storage::{FileSessionStorage, InMemorySessionStorage, SessionFormat, SessionStorage};
#[cfg(feature = "persistence")]
pub use storage::SqliteSessionStorage;
pub use tool::{RegisteredTool, Tool, ToolDescription, ToolOptions, ToolRegistry, Toolkit};
