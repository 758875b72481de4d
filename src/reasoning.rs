//! Chain-of-thought reasoning delegate.
//!
//! Before the primary run loop starts, the agent can hand the task to a
//! (usually cheaper) reasoning model. The delegate drives a bounded
//! step-by-step loop, then folds the trace into a single `<thinking>` message
//! that is visible to the primary model but never persisted. Every failure in
//! here is recoverable: the run proceeds without reasoning content.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::llm::LanguageModel;
use crate::message::{Message, Role};

/// A single step in the chain-of-thought process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default = "NextAction::continue_")]
    pub next_action: NextAction,
    #[serde(default)]
    pub confidence: f32,
}

/// What the reasoning model wants to do after a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Continue,
    Validate,
    FinalAnswer,
    Reset,
}

impl NextAction {
    fn continue_() -> Self {
        NextAction::Continue
    }
}

/// The structured trace accumulated across reasoning turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningSteps {
    #[serde(default)]
    pub steps: Vec<ReasoningStep>,
    #[serde(default)]
    pub final_answer: Option<String>,
}

impl ReasoningSteps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, step: ReasoningStep) {
        self.steps.push(step);
    }

    /// Renders the trace in the form injected into the primary prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (index, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("Step {}: {}\n", index + 1, step.title));
            if !step.action.is_empty() {
                out.push_str(&format!("Action: {}\n", step.action));
            }
            if let Some(result) = &step.result {
                out.push_str(&format!("Result: {result}\n"));
            }
            if !step.reasoning.is_empty() {
                out.push_str(&format!("Reasoning: {}\n", step.reasoning));
            }
            out.push('\n');
        }
        if let Some(answer) = &self.final_answer {
            out.push_str(&format!("Conclusion: {answer}\n"));
        }
        out.trim_end().to_string()
    }
}

#[derive(Clone)]
pub struct ReasoningConfig {
    /// Minimum number of steps requested in the prompt.
    pub min_steps: usize,
    /// Upper bound on reasoning turns before the delegate gives up and uses
    /// whatever trace it has.
    pub max_steps: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            min_steps: 1,
            max_steps: 10,
        }
    }
}

pub fn reasoning_system_prompt(config: &ReasoningConfig) -> String {
    format!(
        r#"You are a meticulous, logical reasoning assistant. Work through the user's task step by step before anyone attempts to answer it.

For each step emit a JSON object with fields:
- "title": concise summary of the step
- "action": what you are doing ("I will...")
- "result": the outcome of the action, if any
- "reasoning": why this step is necessary
- "next_action": one of "continue", "validate", "final_answer", "reset"
- "confidence": 0.0-1.0

Respond with a single JSON object: {{"steps": [...], "final_answer": "..."}}.
Use at least {} and at most {} steps. Choose "final_answer" only when you are confident, "reset" if your approach is wrong, "validate" to cross-check a result."#,
        config.min_steps, config.max_steps
    )
}

fn think_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("static pattern"))
}

/// Pulls `<think>...</think>` spans out of raw content, for models that
/// interleave deliberation with their answer.
pub fn extract_think_tags(content: &str) -> (Option<String>, String) {
    let pattern = think_tag_pattern();
    if !pattern.is_match(content) {
        return (None, content.to_string());
    }
    let mut thinking = String::new();
    for capture in pattern.captures_iter(content) {
        if !thinking.is_empty() {
            thinking.push('\n');
        }
        thinking.push_str(capture[1].trim());
    }
    let remainder = pattern.replace_all(content, "").trim().to_string();
    (Some(thinking), remainder)
}

fn parse_reasoning_steps(content: &str) -> Option<ReasoningSteps> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    serde_json::from_str::<ReasoningSteps>(&content[start..=end]).ok()
}

/// Runs the bounded reasoning loop against a delegate model.
pub struct ReasoningDelegate {
    model: Arc<dyn LanguageModel>,
    config: ReasoningConfig,
}

impl ReasoningDelegate {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            config: ReasoningConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ReasoningConfig) -> Self {
        self.config = config;
        self
    }

    /// Reasons over the conversation so far and produces the transient
    /// `<thinking>` message for the primary prompt, or `None` when reasoning
    /// failed or yielded nothing. Never returns an error: reasoning failures
    /// degrade, they do not abort the run.
    pub async fn reason(&self, conversation: &[Message]) -> Option<Message> {
        match self.reason_inner(conversation).await {
            Ok(Some(trace)) if !trace.is_empty() => {
                Some(Message::assistant(format!("<thinking>\n{trace}\n</thinking>")).transient())
            }
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "reasoning delegate failed, continuing without reasoning");
                None
            }
        }
    }

    async fn reason_inner(&self, conversation: &[Message]) -> Result<Option<String>> {
        // The delegate gets its own system prompt but sees the full prior
        // conversation, so multi-turn and resumed sessions reason in context.
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(reasoning_system_prompt(&self.config)));
        messages.extend(
            conversation
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );
        let mut accumulated = ReasoningSteps::new();

        for turn in 0..self.config.max_steps {
            let completion = self.model.complete_chat(&messages, &[], false).await?;
            let Some(raw) = completion.content else {
                break;
            };

            let (thinking, body) = extract_think_tags(&raw);

            let Some(parsed) = parse_reasoning_steps(&body) else {
                // Unstructured output still counts as a trace.
                let mut trace = thinking.unwrap_or_default();
                if !body.is_empty() {
                    if !trace.is_empty() {
                        trace.push('\n');
                    }
                    trace.push_str(&body);
                }
                if trace.is_empty() {
                    break;
                }
                return Ok(Some(trace));
            };

            let wants_reset = parsed
                .steps
                .iter()
                .any(|step| step.next_action == NextAction::Reset);
            let wants_more = parsed
                .steps
                .last()
                .map(|step| {
                    matches!(step.next_action, NextAction::Continue | NextAction::Validate)
                })
                .unwrap_or(false);
            let final_answer = parsed.final_answer.clone();

            if wants_reset {
                debug!(turn, "reasoning delegate reset its trace");
                accumulated = ReasoningSteps::new();
            } else {
                for step in parsed.steps {
                    accumulated.add_step(step);
                }
                accumulated.final_answer = final_answer.clone();
            }

            if final_answer.is_some() && !wants_reset {
                break;
            }
            if !wants_more && !wants_reset {
                break;
            }

            messages.push(Message::assistant(raw));
            messages.push(Message::user(
                "Continue reasoning from where you left off. Emit the next steps in the same JSON shape.",
            ));
        }

        if accumulated.steps.is_empty() && accumulated.final_answer.is_none() {
            return Ok(None);
        }
        Ok(Some(accumulated.render()))
    }
}
