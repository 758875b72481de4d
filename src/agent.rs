//! The agent: a run loop that alternates between the language model and
//! registered tools until the model answers in plain text, a tool or hook
//! stops the run, or the step limit trips.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::hooks::HookDecision;
use crate::llm::LanguageModel;
use crate::memory::{AgentSession, ConversationMemory};
use crate::message::{Message, ToolCall, ToolResult};
use crate::reasoning::ReasoningDelegate;
use crate::run::{RunEvent, RunMetrics, RunResponse};
use crate::storage::SessionStorage;
use crate::tool::{RegisteredTool, ToolRegistry, Toolkit};

const DEFAULT_MAX_STEPS: usize = 10;
const DEFAULT_RETRY_LIMIT: usize = 3;

/// What a hook-mediated tool execution produced.
enum ToolOutcome {
    Completed(ToolResult),
    Aborted {
        user_message: Option<String>,
        agent_message: Option<String>,
    },
}

pub struct Agent {
    model: Arc<dyn LanguageModel>,
    instructions: String,
    tools: ToolRegistry,
    memory: ConversationMemory,
    session: AgentSession,
    storage: Option<Arc<dyn SessionStorage>>,
    reasoning: Option<ReasoningDelegate>,
    max_steps: usize,
    retry_limit: usize,
    /// After this many tool calls in one run, tools are withheld from the
    /// model so it has to answer in text.
    tool_call_limit: Option<usize>,
    history_window: Option<usize>,
    session_loaded: bool,
}

impl Agent {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            instructions: "You are a helpful agent.".to_string(),
            tools: ToolRegistry::new(),
            memory: ConversationMemory::default(),
            session: AgentSession::new(Uuid::new_v4().to_string()),
            storage: None,
            reasoning: None,
            max_steps: DEFAULT_MAX_STEPS,
            retry_limit: DEFAULT_RETRY_LIMIT,
            tool_call_limit: None,
            history_window: None,
            session_loaded: false,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_toolkit(mut self, toolkit: Toolkit) -> Self {
        self.tools.add_toolkit(toolkit);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session.session_id = session_id.into();
        self.session_loaded = false;
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.session.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.session.user_id = Some(user_id.into());
        self
    }

    pub fn with_reasoning(mut self, delegate: ReasoningDelegate) -> Self {
        self.reasoning = Some(delegate);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_tool_call_limit(mut self, limit: usize) -> Self {
        self.tool_call_limit = Some(limit);
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = Some(window);
        self
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    /// Loads the configured session from storage, replacing in-run memory
    /// with the persisted transcript. A missing row starts a fresh session.
    pub async fn load_session(&mut self) -> Result<()> {
        self.session_loaded = true;
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        if let Some(stored) = storage.read(&self.session.session_id).await? {
            self.memory = ConversationMemory::with_messages(stored.memory.clone());
            self.session = stored;
            debug!(session_id = %self.session.session_id, messages = self.memory.len(), "resumed session");
        }
        Ok(())
    }

    /// Run one exchange and return the final response.
    pub async fn run(&mut self, input: impl Into<String>) -> Result<RunResponse> {
        self.run_inner(input.into(), None).await
    }

    /// Like [`run`](Agent::run), but emits every lifecycle event on `events`
    /// as the run progresses. The final `RunCompleted` is both sent and
    /// returned.
    pub async fn run_stream(
        &mut self,
        input: impl Into<String>,
        events: UnboundedSender<RunResponse>,
    ) -> Result<RunResponse> {
        self.run_inner(input.into(), Some(events)).await
    }

    async fn run_inner(
        &mut self,
        input: String,
        events: Option<UnboundedSender<RunResponse>>,
    ) -> Result<RunResponse> {
        if !self.session_loaded {
            self.load_session().await?;
        }

        let run_id = Uuid::new_v4().to_string();
        let session_id = self.session.session_id.clone();
        let started = Instant::now();
        let mut metrics = RunMetrics::default();

        info!(run_id = %run_id, session_id = %session_id, "run started");
        emit(&events, RunResponse::event(&run_id, &session_id, RunEvent::RunStarted));

        if self.memory.is_empty() {
            self.memory.push(Message::system(self.instructions.clone()));
        }
        self.memory.push(Message::user(&input));

        // Reasoning runs before the primary model sees anything; its trace is
        // prompt-only and every failure inside it degrades to "no trace".
        let mut reasoning_content = None;
        if let Some(delegate) = &self.reasoning {
            emit(
                &events,
                RunResponse::event(&run_id, &session_id, RunEvent::ReasoningStarted),
            );
            let context = self.memory.context(self.history_window);
            if let Some(thinking) = delegate.reason(&context).await {
                reasoning_content = Some(thinking.content.clone());
                self.memory.push(thinking);
            }
            let mut done = RunResponse::event(&run_id, &session_id, RunEvent::ReasoningCompleted);
            done.reasoning_content = reasoning_content.clone();
            emit(&events, done);
        }

        let mut tool_calls_made = 0usize;

        for _step in 0..self.max_steps {
            let tools_exhausted = self
                .tool_call_limit
                .map(|limit| tool_calls_made >= limit)
                .unwrap_or(false);
            let descriptions = if tools_exhausted {
                Vec::new()
            } else {
                self.tools.descriptions()
            };

            let context = self.memory.context(self.history_window);
            let completion = self.model.complete_chat(&context, &descriptions, false).await?;
            metrics.model_requests += 1;

            let mut assistant = Message::assistant(completion.content.clone().unwrap_or_default());
            assistant.tool_calls = completion.tool_calls.clone();
            assistant.reasoning_content = completion.reasoning_content.clone();
            assistant.extra = completion.extra.clone();
            self.memory.push(assistant);

            if completion.tool_calls.is_empty() {
                let content = completion.content.unwrap_or_default();
                metrics.duration_ms = started.elapsed().as_millis() as u64;
                self.persist_session().await?;
                let mut response =
                    RunResponse::event(&run_id, &session_id, RunEvent::RunCompleted)
                        .with_content(content);
                response.reasoning_content = reasoning_content;
                response.metrics = Some(metrics);
                emit(&events, response.clone());
                info!(run_id = %run_id, "run completed");
                return Ok(response);
            }

            for call in completion.tool_calls {
                tool_calls_made += 1;
                emit(
                    &events,
                    RunResponse::event(&run_id, &session_id, RunEvent::ToolCallStarted)
                        .with_tool_calls(vec![call.clone()]),
                );

                let Some(registered) = self.tools.get(&call.name).cloned() else {
                    let err = AgentError::ToolNotFound(call.name.clone());
                    warn!(tool = %call.name, error = %err, "model requested unknown tool");
                    let result = ToolResult {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        output: json!({"error": err.to_string()}),
                        error: true,
                    };
                    self.memory
                        .push(Message::tool(&call, result.output.clone(), true));
                    emit(
                        &events,
                        RunResponse::event(&run_id, &session_id, RunEvent::ToolCallCompleted)
                            .with_tool_result(result),
                    );
                    continue;
                };

                let tool_started = Instant::now();
                let outcome = self.execute_with_hooks(&call, &registered).await;
                metrics.record_tool_call(&call.name, tool_started.elapsed().as_millis() as u64);

                match outcome {
                    ToolOutcome::Aborted {
                        user_message,
                        agent_message,
                    } => {
                        if let Some(text) = user_message {
                            self.memory.push(Message::user(text));
                        }
                        if let Some(text) = &agent_message {
                            self.memory.push(Message::assistant(text.clone()));
                        }
                        metrics.duration_ms = started.elapsed().as_millis() as u64;
                        self.persist_session().await?;
                        let mut response =
                            RunResponse::event(&run_id, &session_id, RunEvent::RunCompleted);
                        response.content = agent_message;
                        response.metrics = Some(metrics);
                        emit(&events, response.clone());
                        info!(run_id = %run_id, tool = %call.name, "run stopped by hook");
                        return Ok(response);
                    }
                    ToolOutcome::Completed(result) => {
                        self.memory
                            .push(Message::tool(&call, result.output.clone(), result.error));

                        let mut completed =
                            RunResponse::event(&run_id, &session_id, RunEvent::ToolCallCompleted);
                        if registered.options.show_result {
                            completed.content = Some(result.output.to_string());
                        }
                        completed.tool_result = Some(result);
                        emit(&events, completed);

                        if registered.options.stop_after_call {
                            // The result stays in memory but never reaches
                            // the model, so the run ends with no content.
                            metrics.duration_ms = started.elapsed().as_millis() as u64;
                            self.persist_session().await?;
                            let mut response = RunResponse::event(
                                &run_id,
                                &session_id,
                                RunEvent::RunCompleted,
                            );
                            response.metrics = Some(metrics);
                            emit(&events, response.clone());
                            info!(run_id = %run_id, tool = %call.name, "run ended by stop_after_call");
                            return Ok(response);
                        }
                    }
                }
            }
        }

        self.persist_session().await?;
        Err(AgentError::Run(format!(
            "reached the step limit ({}) without a final response",
            self.max_steps
        )))
    }

    /// Runs one tool call under its hook. `Retry` re-executes the call in
    /// place, discarding the previous result; attempts are capped by
    /// `retry_limit`, after which the last corrective intent is surfaced to
    /// the model as an error result.
    async fn execute_with_hooks(
        &mut self,
        call: &ToolCall,
        registered: &RegisteredTool,
    ) -> ToolOutcome {
        let mut retries = 0usize;

        loop {
            if let Some(hook) = &registered.options.hook {
                match hook.before_call(call).await {
                    HookDecision::Proceed => {}
                    HookDecision::Retry { message } => {
                        retries += 1;
                        if retries > self.retry_limit {
                            return ToolOutcome::Completed(retry_limit_result(call, self.retry_limit));
                        }
                        debug!(tool = %call.name, retries, "hook requested retry before call");
                        if let Some(text) = message {
                            self.memory.push(Message::user(text));
                        }
                        continue;
                    }
                    HookDecision::Stop {
                        user_message,
                        agent_message,
                    } => {
                        return ToolOutcome::Aborted {
                            user_message,
                            agent_message,
                        }
                    }
                }
            }

            let result = match registered.invoke(call.arguments.clone()).await {
                Ok(output) => ToolResult {
                    tool_call_id: call.id.clone(),
                    name: call.name.clone(),
                    output,
                    error: false,
                },
                Err(err) => {
                    warn!(tool = %call.name, error = %err, "tool invocation failed");
                    ToolResult {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        output: json!({"error": err.to_string()}),
                        error: true,
                    }
                }
            };

            let Some(hook) = &registered.options.hook else {
                return ToolOutcome::Completed(result);
            };
            match hook.after_call(call, &result).await {
                HookDecision::Proceed => return ToolOutcome::Completed(result),
                HookDecision::Retry { message } => {
                    retries += 1;
                    if retries > self.retry_limit {
                        return ToolOutcome::Completed(retry_limit_result(call, self.retry_limit));
                    }
                    debug!(tool = %call.name, retries, "hook discarded result, retrying");
                    if let Some(text) = message {
                        self.memory.push(Message::user(text));
                    }
                }
                HookDecision::Stop {
                    user_message,
                    agent_message,
                } => {
                    return ToolOutcome::Aborted {
                        user_message,
                        agent_message,
                    }
                }
            }
        }
    }

    async fn persist_session(&mut self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        self.session.capture(&self.memory);
        storage.upsert(&self.session).await
    }
}

fn retry_limit_result(call: &ToolCall, limit: usize) -> ToolResult {
    ToolResult {
        tool_call_id: call.id.clone(),
        name: call.name.clone(),
        output: json!({"error": format!("tool `{}` exceeded the retry limit ({limit})", call.name)}),
        error: true,
    }
}

fn emit(events: &Option<UnboundedSender<RunResponse>>, response: RunResponse) {
    if let Some(sender) = events {
        // Receiver hang-up just means nobody is watching the stream.
        let _ = sender.send(response);
    }
}
