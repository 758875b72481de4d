//! Language model abstractions and provider clients.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{AgentError, Result};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDescription;

/// Normalized result of a chat completion request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    /// Deliberation trace for providers that return it separately.
    pub reasoning_content: Option<String>,
    /// Provider-specific payload fragments carried onto the assistant
    /// message (e.g. raw Gemini `parts`).
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ModelCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value, id: Option<String>) -> Self {
        Self {
            tool_calls: vec![ToolCall {
                id,
                name: name.into(),
                arguments,
            }],
            ..Self::default()
        }
    }
}

/// Minimal abstraction over a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        stream: bool,
    ) -> Result<ModelCompletion>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> AgentError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return AgentError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    AgentError::LanguageModel(format!("{provider} request failed with {status}: {body}"))
}

fn serialize_tool_arguments(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| args.to_string())
}

fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|err| AgentError::LanguageModel(format!("http client error: {err}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    organization: Option<String>,
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_http_client(60)?,
            model: model.into(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            organization: None,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AgentError::LanguageModel("OPENAI_API_KEY not set".into()))?;
        Self::new(api_key, model)
    }

    fn to_openai_messages(&self, messages: &[Message]) -> Vec<OpenAiMessage> {
        let mut built = Vec::new();
        for message in messages {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string();

            let tool_calls = if message.tool_calls.is_empty() {
                None
            } else {
                Some(
                    message
                        .tool_calls
                        .iter()
                        .enumerate()
                        .map(|(index, call)| OpenAiToolCall {
                            id: call.id.clone().unwrap_or_else(|| format!("call_{index}")),
                            r#type: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name: call.name.clone(),
                                arguments: serialize_tool_arguments(&call.arguments),
                            },
                        })
                        .collect(),
                )
            };

            let content = if message.role == Role::Tool {
                message
                    .tool_result
                    .as_ref()
                    .map(|result| serialize_tool_arguments(&result.output))
                    .or_else(|| Some(message.content.clone()))
            } else {
                Some(message.content.clone())
            };

            let tool_call_id = message
                .tool_result
                .as_ref()
                .and_then(|result| result.tool_call_id.clone());

            built.push(OpenAiMessage {
                role,
                content,
                tool_call_id,
                tool_calls,
            });
        }
        built
    }

    fn to_openai_tools(&self, tools: &[ToolDescription]) -> Option<Vec<OpenAiTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|tool| OpenAiTool {
                    r#type: "function".to_string(),
                    function: OpenAiFunction {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        )
    }
}

#[async_trait]
impl LanguageModel for OpenAIClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        stream: bool,
    ) -> Result<ModelCompletion> {
        let payload = json!({
            "model": self.model,
            "messages": self.to_openai_messages(messages),
            "tools": self.to_openai_tools(tools),
            "tool_choice": if tools.is_empty() { Value::Null } else { Value::String("auto".to_string()) },
            "stream": stream,
        });

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            );
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        let resp = builder
            .json(&payload)
            .send()
            .await
            .map_err(|err| AgentError::LanguageModel(format!("OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "openai"));
        }

        if stream {
            let mut content = String::new();
            let mut tool_calls: HashMap<String, OpenAiToolCallState> = HashMap::new();
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|err| {
                    AgentError::LanguageModel(format!("OpenAI stream error: {err}"))
                })?;
                let text = String::from_utf8_lossy(&chunk);
                for line in text.lines() {
                    if !line.starts_with("data: ") {
                        continue;
                    }
                    let data = line.trim_start_matches("data: ").trim();
                    if data == "[DONE]" {
                        continue;
                    }
                    let parsed: OpenAiStreamChunk = serde_json::from_str(data).map_err(|err| {
                        AgentError::LanguageModel(format!(
                            "OpenAI stream parse error `{data}`: {err}"
                        ))
                    })?;

                    for choice in parsed.choices {
                        if let Some(delta_content) = choice.delta.content {
                            content.push_str(&delta_content);
                        }
                        if let Some(calls) = choice.delta.tool_calls {
                            for delta_call in calls {
                                let id = delta_call
                                    .id
                                    .clone()
                                    .unwrap_or_else(|| format!("call_{}", tool_calls.len()));
                                let state = tool_calls.entry(id.clone()).or_default();
                                if let Some(function) = delta_call.function {
                                    if let Some(name) = function.name {
                                        state.name = Some(name);
                                    }
                                    if let Some(args) = function.arguments {
                                        state.arguments.push_str(&args);
                                    }
                                }
                                state.id = Some(id);
                            }
                        }
                    }
                }
            }

            let calls: Vec<ToolCall> = tool_calls
                .into_values()
                .filter_map(|state| {
                    let name = state.name?;
                    let args = serde_json::from_str(&state.arguments)
                        .unwrap_or_else(|_| Value::String(state.arguments.clone()));
                    Some(ToolCall {
                        id: state.id,
                        name,
                        arguments: args,
                    })
                })
                .collect();

            return Ok(ModelCompletion {
                content: if content.is_empty() {
                    None
                } else {
                    Some(content)
                },
                tool_calls: calls,
                ..ModelCompletion::default()
            });
        }

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            AgentError::LanguageModel(format!("OpenAI response parse error: {err}"))
        })?;

        let first = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::LanguageModel("OpenAI returned no choices".into()))?;

        let mut tool_calls = Vec::new();
        if let Some(calls) = first.message.tool_calls {
            for call in calls {
                let args = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
                tool_calls.push(ToolCall {
                    id: Some(call.id),
                    name: call.function.name,
                    arguments: args,
                });
            }
        }

        Ok(ModelCompletion {
            content: first.message.content,
            tool_calls,
            reasoning_content: first.message.reasoning_content,
            extra: Map::new(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Anthropic
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_http_client(60)?,
            model: model.into(),
            api_key: api_key.into(),
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            max_tokens: 4096,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| AgentError::LanguageModel("ANTHROPIC_API_KEY not set".into()))?;
        Self::new(api_key, model)
    }

    fn to_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .filter(|message| message.role != Role::System)
            .map(|message| match message.role {
                Role::Tool => {
                    let result = message.tool_result.as_ref();
                    json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": result.and_then(|r| r.tool_call_id.clone()).unwrap_or_default(),
                            "content": result.map(|r| serialize_tool_arguments(&r.output)).unwrap_or_default(),
                            "is_error": result.map(|r| r.error).unwrap_or(false),
                        }]
                    })
                }
                _ if !message.tool_calls.is_empty() => {
                    let mut blocks: Vec<Value> = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": message.content}));
                    }
                    for (index, call) in message.tool_calls.iter().enumerate() {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id.clone().unwrap_or_else(|| format!("toolu_{index}")),
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    json!({"role": "assistant", "content": blocks})
                }
                Role::Assistant => json!({"role": "assistant", "content": message.content}),
                _ => json!({"role": "user", "content": message.content}),
            })
            .collect()
    }

    fn to_tools(&self, tools: &[ToolDescription]) -> Option<Vec<Value>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool
                            .parameters
                            .clone()
                            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                    })
                })
                .collect(),
        )
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        stream: bool,
    ) -> Result<ModelCompletion> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());
        let payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": self.to_messages(messages),
            "tools": self.to_tools(tools),
            "stream": stream,
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .map_err(|err| AgentError::LanguageModel(format!("Anthropic request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "anthropic"));
        }

        if stream {
            let mut content = String::new();
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|err| {
                    AgentError::LanguageModel(format!("Anthropic stream error: {err}"))
                })?;
                let text = String::from_utf8_lossy(&chunk);
                for line in text.lines() {
                    if !line.starts_with("data: ") {
                        continue;
                    }
                    let data = line.trim_start_matches("data: ").trim();
                    if data == "[DONE]" || data.is_empty() {
                        continue;
                    }
                    if let Ok(parsed) = serde_json::from_str::<AnthropicStreamChunk>(data) {
                        if let Some(delta) = parsed.delta {
                            if let Some(text) = delta.text {
                                content.push_str(&text);
                            }
                        }
                    }
                }
            }

            return Ok(ModelCompletion {
                content: if content.is_empty() {
                    None
                } else {
                    Some(content)
                },
                ..ModelCompletion::default()
            });
        }

        let parsed: AnthropicResponse = resp.json().await.map_err(|err| {
            AgentError::LanguageModel(format!("Anthropic response parse error: {err}"))
        })?;

        let mut text = String::new();
        let mut thinking: Option<String> = None;
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block.r#type.as_str() {
                "text" => {
                    if let Some(chunk) = block.text {
                        text.push_str(&chunk);
                    }
                }
                "thinking" => {
                    if let Some(chunk) = block.thinking {
                        thinking = Some(chunk);
                    }
                }
                "tool_use" => {
                    tool_calls.push(ToolCall {
                        id: block.id,
                        name: block.name.unwrap_or_default(),
                        arguments: block.input.unwrap_or_else(|| json!({})),
                    });
                }
                _ => {}
            }
        }

        Ok(ModelCompletion {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls,
            reasoning_content: thinking,
            extra: Map::new(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gemini
// ─────────────────────────────────────────────────────────────────────────────

/// Gemini client over the `generateContent` endpoint; responses arrive as a
/// single buffered candidate regardless of the `stream` flag.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_http_client(60)?,
            model: model.into(),
            api_key: api_key.into(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| AgentError::LanguageModel("GEMINI_API_KEY not set".into()))?;
        Self::new(api_key, model)
    }

    fn to_contents(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .filter(|message| message.role != Role::System)
            .map(|message| {
                let role = match message.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                let part = match (&message.tool_result, message.tool_calls.first()) {
                    (Some(result), _) => json!({
                        "functionResponse": {
                            "name": result.name,
                            "response": {"output": result.output},
                        }
                    }),
                    (None, Some(call)) => json!({
                        "functionCall": {"name": call.name, "args": call.arguments}
                    }),
                    _ => json!({"text": message.content}),
                };
                json!({"role": role, "parts": [part]})
            })
            .collect()
    }

    fn to_tools(&self, tools: &[ToolDescription]) -> Option<Value> {
        if tools.is_empty() {
            return None;
        }
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool
                        .parameters
                        .clone()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                })
            })
            .collect();
        Some(json!([{"functionDeclarations": declarations}]))
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        _stream: bool,
    ) -> Result<ModelCompletion> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| json!({"parts": [{"text": m.content}]}));
        let payload = json!({
            "systemInstruction": system,
            "contents": self.to_contents(messages),
            "tools": self.to_tools(tools),
        });
        let resp = self
            .http
            .post(format!(
                "{}/models/{}:generateContent?key={}",
                self.endpoint, self.model, self.api_key
            ))
            .json(&payload)
            .send()
            .await
            .map_err(|err| AgentError::LanguageModel(format!("Gemini request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "gemini"));
        }

        let parsed: Value = resp.json().await.map_err(|err| {
            AgentError::LanguageModel(format!("Gemini response parse error: {err}"))
        })?;

        let parts = parsed["candidates"][0]["content"]["parts"].clone();
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(parts_arr) = parts.as_array() {
            for part in parts_arr {
                if let Some(text) = part["text"].as_str() {
                    content.push_str(text);
                }
                if let Some(call) = part.get("functionCall") {
                    tool_calls.push(ToolCall {
                        id: None,
                        name: call["name"].as_str().unwrap_or_default().to_string(),
                        arguments: call["args"].clone(),
                    });
                }
            }
        }

        // The SDK-shaped `parts` ride along on the assistant message; session
        // sanitization strips them before anything reaches storage.
        let mut extra = Map::new();
        if !parts.is_null() {
            extra.insert("parts".to_string(), parts);
        }

        Ok(ModelCompletion {
            content: if content.is_empty() {
                None
            } else {
                Some(content)
            },
            tool_calls,
            reasoning_content: None,
            extra,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Groq (OpenAI-compatible API)
// ─────────────────────────────────────────────────────────────────────────────

/// Groq client. Default model: llama-3.3-70b-versatile.
///
/// Responses are always requested buffered; delta accumulation is only
/// wired up for the OpenAI and Anthropic clients.
#[derive(Clone)]
pub struct GroqClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl GroqClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_http_client(120)?,
            model: "llama-3.3-70b-versatile".to_string(),
            api_key: api_key.into(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GROQ_API_KEY")
            .map_err(|_| AgentError::LanguageModel("GROQ_API_KEY not set".into()))?;
        Self::new(api_key)
    }
}

#[async_trait]
impl LanguageModel for GroqClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        _stream: bool,
    ) -> Result<ModelCompletion> {
        let oai_messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                let mut msg = json!({
                    "role": role,
                    "content": m.content.clone()
                });
                if let Some(result) = &m.tool_result {
                    msg["content"] = json!(serialize_tool_arguments(&result.output));
                    if let Some(call_id) = &result.tool_call_id {
                        msg["tool_call_id"] = json!(call_id);
                    }
                }
                if !m.tool_calls.is_empty() {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .iter()
                        .enumerate()
                        .map(|(index, call)| {
                            json!({
                                "id": call.id.clone().unwrap_or_else(|| format!("call_{index}")),
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": serialize_tool_arguments(&call.arguments),
                                }
                            })
                        })
                        .collect();
                    msg["tool_calls"] = json!(calls);
                }
                msg
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": oai_messages,
            "stream": false
        });

        if !tools.is_empty() {
            let oai_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters
                        }
                    })
                })
                .collect();
            body["tools"] = json!(oai_tools);
        }

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| AgentError::LanguageModel(format!("Groq request failed: {err}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "groq"));
        }

        let parsed: Value = resp
            .json()
            .await
            .map_err(|err| AgentError::LanguageModel(format!("Groq parse error: {err}")))?;

        let choice = &parsed["choices"][0]["message"];
        let content = choice["content"].as_str().map(String::from);

        let mut tool_calls = Vec::new();
        if let Some(calls) = choice["tool_calls"].as_array() {
            for call in calls {
                let name = call["function"]["name"].as_str().unwrap_or("").to_string();
                let args_str = call["function"]["arguments"].as_str().unwrap_or("{}");
                let args: Value = serde_json::from_str(args_str).unwrap_or_else(|_| json!({}));
                tool_calls.push(ToolCall {
                    id: call["id"].as_str().map(String::from),
                    name,
                    arguments: args,
                });
            }
        }

        Ok(ModelCompletion {
            content,
            tool_calls,
            reasoning_content: choice["reasoning_content"].as_str().map(String::from),
            extra: Map::new(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub model for tests and demos
// ─────────────────────────────────────────────────────────────────────────────

/// A deterministic model that replays scripted completions and records every
/// request payload it receives.
pub struct StubModel {
    scripted: Mutex<VecDeque<ModelCompletion>>,
    requests: Mutex<Vec<Vec<Message>>>,
    tools_advertised: Mutex<Vec<Vec<String>>>,
}

impl StubModel {
    pub fn new(scripted: Vec<ModelCompletion>) -> Self {
        Self {
            scripted: Mutex::new(scripted.into()),
            requests: Mutex::new(Vec::new()),
            tools_advertised: Mutex::new(Vec::new()),
        }
    }

    /// Every message list sent to the model so far, in call order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().expect("stub model poisoned").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("stub model poisoned").len()
    }

    /// The tool names offered alongside each request, in call order.
    pub fn tools_advertised(&self) -> Vec<Vec<String>> {
        self.tools_advertised
            .lock()
            .expect("stub model poisoned")
            .clone()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        _stream: bool,
    ) -> Result<ModelCompletion> {
        self.requests
            .lock()
            .expect("stub model poisoned")
            .push(messages.to_vec());
        self.tools_advertised
            .lock()
            .expect("stub model poisoned")
            .push(tools.iter().map(|t| t.name.clone()).collect());
        self.scripted
            .lock()
            .expect("stub model poisoned")
            .pop_front()
            .ok_or_else(|| {
                AgentError::LanguageModel("StubModel ran out of scripted completions".into())
            })
    }
}

/// A model that always fails, for exercising degraded paths.
pub struct FailingModel;

#[async_trait]
impl LanguageModel for FailingModel {
    async fn complete_chat(
        &self,
        _messages: &[Message],
        _tools: &[ToolDescription],
        _stream: bool,
    ) -> Result<ModelCompletion> {
        Err(AgentError::LanguageModel("provider unavailable".into()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct OpenAiMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Serialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiStreamToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiStreamFunction>,
}

#[derive(Deserialize)]
struct OpenAiStreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Default)]
struct OpenAiToolCallState {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Deserialize)]
struct AnthropicStreamChunk {
    #[serde(default)]
    delta: Option<AnthropicStreamDelta>,
}

#[derive(Deserialize)]
struct AnthropicStreamDelta {
    #[serde(default)]
    text: Option<String>,
}
