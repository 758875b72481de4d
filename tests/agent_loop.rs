//! End-to-end run loop behavior against a scripted model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use agentry::{
    Agent, AgentError, FailingModel, HookDecision, Message, ModelCompletion, ReasoningDelegate,
    Result, Role, RunEvent, StubModel, Tool, ToolCall, ToolHook, ToolOptions, ToolRegistry,
    ToolResult,
};

/// A tool that reports which attempt produced its output.
struct CountingTool {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        "counter"
    }

    fn description(&self) -> &str {
        "Reports how many times it has run."
    }

    async fn call(&self, _input: Value) -> Result<Value> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({"attempt": attempt}))
    }
}

struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Always fails."
    }

    async fn call(&self, _input: Value) -> Result<Value> {
        Err(AgentError::Run("wires crossed".into()))
    }
}

/// Retries once from `after_call`, discarding the first result.
struct RetryOnceHook {
    retries: AtomicUsize,
}

#[async_trait]
impl ToolHook for RetryOnceHook {
    async fn after_call(&self, _call: &ToolCall, _result: &ToolResult) -> HookDecision {
        if self.retries.fetch_add(1, Ordering::SeqCst) == 0 {
            HookDecision::Retry {
                message: Some("First attempt looked wrong, try again.".into()),
            }
        } else {
            HookDecision::Proceed
        }
    }
}

struct AlwaysStopHook;

#[async_trait]
impl ToolHook for AlwaysStopHook {
    async fn before_call(&self, _call: &ToolCall) -> HookDecision {
        HookDecision::Stop {
            user_message: Some("Please do not run that tool.".into()),
            agent_message: Some("I stopped before running the tool.".into()),
        }
    }
}

fn counter_call() -> ModelCompletion {
    ModelCompletion::tool_call("counter", json!({}), Some("call_1".into()))
}

#[tokio::test]
async fn tool_call_then_answer_pairs_ids() {
    let stub = Arc::new(StubModel::new(vec![
        counter_call(),
        ModelCompletion::text("All done."),
    ]));
    let mut tools = ToolRegistry::new();
    tools.register(CountingTool {
        calls: Arc::new(AtomicUsize::new(0)),
    });
    let mut agent = Agent::new(stub.clone()).with_tools(tools);

    let response = agent.run("count it").await.unwrap();

    assert_eq!(response.content.as_deref(), Some("All done."));
    let requests = stub.requests();
    assert_eq!(requests.len(), 2);
    // Second request carries the tool result, paired by call id.
    let tool_message = requests[1]
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool result sent back to the model");
    let result = tool_message.tool_result.as_ref().unwrap();
    assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(result.output, json!({"attempt": 1}));
}

#[tokio::test]
async fn retry_hook_runs_the_tool_twice_and_discards_the_first_result() {
    let stub = Arc::new(StubModel::new(vec![
        counter_call(),
        ModelCompletion::text("done"),
    ]));
    let calls = Arc::new(AtomicUsize::new(0));
    let mut tools = ToolRegistry::new();
    tools.register_with(
        CountingTool {
            calls: calls.clone(),
        },
        ToolOptions::default().with_hook(Arc::new(RetryOnceHook {
            retries: AtomicUsize::new(0),
        })),
    );
    let mut agent = Agent::new(stub.clone()).with_tools(tools);

    let response = agent.run("count it").await.unwrap();

    assert_eq!(response.content.as_deref(), Some("done"));
    // Exactly two executions: the original and one retry.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // No model round-trip happened between the attempts, and the first
    // attempt's result never reaches any request payload.
    let requests = stub.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        for message in request {
            if let Some(result) = &message.tool_result {
                assert_eq!(result.output, json!({"attempt": 2}));
            }
        }
    }
    // The corrective message is part of the conversation.
    assert!(requests[1]
        .iter()
        .any(|m| m.role == Role::User && m.content.contains("try again")));
}

#[tokio::test]
async fn retry_limit_caps_hook_loops() {
    struct AlwaysRetryHook;

    #[async_trait]
    impl ToolHook for AlwaysRetryHook {
        async fn after_call(&self, _call: &ToolCall, _result: &ToolResult) -> HookDecision {
            HookDecision::Retry { message: None }
        }
    }

    let stub = Arc::new(StubModel::new(vec![
        counter_call(),
        ModelCompletion::text("gave up"),
    ]));
    let calls = Arc::new(AtomicUsize::new(0));
    let mut tools = ToolRegistry::new();
    tools.register_with(
        CountingTool {
            calls: calls.clone(),
        },
        ToolOptions::default().with_hook(Arc::new(AlwaysRetryHook)),
    );
    let mut agent = Agent::new(stub.clone()).with_tools(tools).with_retry_limit(2);

    let response = agent.run("count it").await.unwrap();

    assert_eq!(response.content.as_deref(), Some("gave up"));
    // Original attempt plus two retries, then the loop surfaces an error
    // result instead of spinning.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let requests = stub.requests();
    let error_result = requests[1]
        .iter()
        .find_map(|m| m.tool_result.as_ref())
        .unwrap();
    assert!(error_result.error);
    assert!(error_result.output["error"]
        .as_str()
        .unwrap()
        .contains("retry limit"));
}

#[tokio::test]
async fn stop_hook_ends_the_run_with_the_substitute_message() {
    let stub = Arc::new(StubModel::new(vec![counter_call()]));
    let calls = Arc::new(AtomicUsize::new(0));
    let mut tools = ToolRegistry::new();
    tools.register_with(
        CountingTool {
            calls: calls.clone(),
        },
        ToolOptions::default().with_hook(Arc::new(AlwaysStopHook)),
    );
    let mut agent = Agent::new(stub.clone()).with_tools(tools);

    let response = agent.run("count it").await.unwrap();

    assert_eq!(
        response.content.as_deref(),
        Some("I stopped before running the tool.")
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(stub.request_count(), 1);
    // Both substitute messages land in history.
    let roles: Vec<Role> = agent.memory().messages().iter().map(|m| m.role).collect();
    assert_eq!(roles.last(), Some(&Role::Assistant));
    assert!(agent
        .memory()
        .messages()
        .iter()
        .any(|m| m.role == Role::User && m.content.contains("do not run")));
}

#[tokio::test]
async fn stop_after_call_ends_the_run_with_no_content() {
    let stub = Arc::new(StubModel::new(vec![counter_call()]));
    let mut tools = ToolRegistry::new();
    tools.register_with(
        CountingTool {
            calls: Arc::new(AtomicUsize::new(0)),
        },
        ToolOptions::default().stop_after_call(),
    );
    let mut agent = Agent::new(stub.clone()).with_tools(tools);

    let response = agent.run("count it").await.unwrap();

    // The run ends without a closing model turn: one request, empty content.
    assert_eq!(response.event, RunEvent::RunCompleted);
    assert!(response.content.is_none());
    assert_eq!(stub.request_count(), 1);
    // The result is still recorded in memory.
    assert!(agent
        .memory()
        .messages()
        .iter()
        .any(|m| m.tool_result.is_some()));
}

#[tokio::test]
async fn tool_failure_becomes_an_error_result_and_the_run_continues() {
    let stub = Arc::new(StubModel::new(vec![
        ModelCompletion::tool_call("broken", json!({}), Some("c1".into())),
        ModelCompletion::text("Recovered."),
    ]));
    let mut tools = ToolRegistry::new();
    tools.register(BrokenTool);
    let mut agent = Agent::new(stub.clone()).with_tools(tools);

    let response = agent.run("break it").await.unwrap();

    assert_eq!(response.content.as_deref(), Some("Recovered."));
    let requests = stub.requests();
    let result = requests[1]
        .iter()
        .find_map(|m| m.tool_result.as_ref())
        .unwrap();
    assert!(result.error);
    assert!(result.output["error"].as_str().unwrap().contains("broken"));
}

#[tokio::test]
async fn unknown_tool_request_feeds_an_error_back_to_the_model() {
    let stub = Arc::new(StubModel::new(vec![
        ModelCompletion::tool_call("nonexistent", json!({}), None),
        ModelCompletion::text("Sorry, no such tool."),
    ]));
    let mut agent = Agent::new(stub.clone());

    let response = agent.run("use a tool").await.unwrap();

    assert_eq!(response.content.as_deref(), Some("Sorry, no such tool."));
    let requests = stub.requests();
    let result = requests[1]
        .iter()
        .find_map(|m| m.tool_result.as_ref())
        .unwrap();
    assert!(result.error);
    assert!(result.output["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn tool_call_limit_withholds_tools_after_the_budget() {
    let stub = Arc::new(StubModel::new(vec![
        counter_call(),
        ModelCompletion::text("forced to answer"),
    ]));
    let mut tools = ToolRegistry::new();
    tools.register(CountingTool {
        calls: Arc::new(AtomicUsize::new(0)),
    });
    let mut agent = Agent::new(stub.clone())
        .with_tools(tools)
        .with_tool_call_limit(1);

    agent.run("count it").await.unwrap();

    let advertised = stub.tools_advertised();
    assert_eq!(advertised[0], vec!["counter".to_string()]);
    assert!(advertised[1].is_empty());
}

#[tokio::test]
async fn reasoning_runs_before_the_primary_model() {
    let delegate_stub = Arc::new(StubModel::new(vec![ModelCompletion::text(
        json!({
            "steps": [{
                "title": "Think",
                "action": "I will think",
                "reasoning": "because",
                "next_action": "final_answer",
                "confidence": 0.9
            }],
            "final_answer": "thought it through"
        })
        .to_string(),
    )]));
    let primary = Arc::new(StubModel::new(vec![ModelCompletion::text("answer")]));
    let mut agent =
        Agent::new(primary.clone()).with_reasoning(ReasoningDelegate::new(delegate_stub.clone()));

    let response = agent.run("hard question").await.unwrap();

    assert_eq!(response.content.as_deref(), Some("answer"));
    assert_eq!(delegate_stub.request_count(), 1);
    // The primary model's first request already contains the trace.
    let requests = primary.requests();
    let first_request = &requests[0];
    assert!(first_request
        .iter()
        .any(|m| m.content.contains("<thinking>") && !m.persist));
}

#[tokio::test]
async fn reasoning_receives_the_conversation_so_far() {
    let delegate_stub = Arc::new(StubModel::new(vec![
        ModelCompletion::text("noting the introduction"),
        ModelCompletion::text("recalling the introduction"),
    ]));
    let primary = Arc::new(StubModel::new(vec![
        ModelCompletion::text("Nice to meet you, Ada."),
        ModelCompletion::text("Your name is Ada."),
    ]));
    let mut agent =
        Agent::new(primary.clone()).with_reasoning(ReasoningDelegate::new(delegate_stub.clone()));

    agent.run("my name is Ada").await.unwrap();
    agent.run("what is my name?").await.unwrap();

    // The second delegation sees the whole first exchange, not just the new
    // user line.
    let requests = delegate_stub.requests();
    assert_eq!(requests.len(), 2);
    let second = &requests[1];
    assert!(second.iter().any(|m| m.content == "my name is Ada"));
    assert!(second
        .iter()
        .any(|m| m.content == "Nice to meet you, Ada."));
    assert_eq!(second.last().unwrap().content, "what is my name?");
}

#[tokio::test]
async fn reasoning_failure_degrades_to_a_plain_run() {
    let primary = Arc::new(StubModel::new(vec![ModelCompletion::text("answer")]));
    let mut agent =
        Agent::new(primary.clone()).with_reasoning(ReasoningDelegate::new(Arc::new(FailingModel)));

    let response = agent.run("question").await.unwrap();

    assert_eq!(response.content.as_deref(), Some("answer"));
    assert!(primary.requests()[0]
        .iter()
        .all(|m| !m.content.contains("<thinking>")));
}

#[tokio::test]
async fn streaming_emits_lifecycle_events_in_order() {
    let stub = Arc::new(StubModel::new(vec![
        counter_call(),
        ModelCompletion::text("streamed"),
    ]));
    let mut tools = ToolRegistry::new();
    tools.register_with(
        CountingTool {
            calls: Arc::new(AtomicUsize::new(0)),
        },
        ToolOptions::default().show_result(),
    );
    let mut agent = Agent::new(stub).with_tools(tools);

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let response = agent.run_stream("count it", sender).await.unwrap();
    assert_eq!(response.content.as_deref(), Some("streamed"));

    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    let tags: Vec<RunEvent> = events.iter().map(|e| e.event).collect();
    assert_eq!(
        tags,
        vec![
            RunEvent::RunStarted,
            RunEvent::ToolCallStarted,
            RunEvent::ToolCallCompleted,
            RunEvent::RunCompleted,
        ]
    );
    // show_result surfaces the output on the completion event.
    let completed = &events[2];
    assert_eq!(completed.content.as_deref(), Some("{\"attempt\":1}"));
    assert!(completed.tool_result.is_some());
    // Every event belongs to the same run.
    assert!(events.iter().all(|e| e.run_id == response.run_id));
}

#[tokio::test]
async fn history_window_limits_the_prompt_but_not_memory() {
    let stub = Arc::new(StubModel::new(vec![
        ModelCompletion::text("one"),
        ModelCompletion::text("two"),
        ModelCompletion::text("three"),
    ]));
    let mut agent = Agent::new(stub.clone()).with_history_window(2);

    agent.run("first").await.unwrap();
    agent.run("second").await.unwrap();
    agent.run("third").await.unwrap();

    let last_request = stub.requests().pop().unwrap();
    let non_system = last_request
        .iter()
        .filter(|m| m.role != Role::System)
        .count();
    assert_eq!(non_system, 2);
    assert!(agent.memory().len() > 3);
}

#[tokio::test]
async fn sequential_tool_calls_run_in_request_order() {
    let mut completion = ModelCompletion::tool_call("counter", json!({}), Some("c1".into()));
    completion.tool_calls.push(agentry::ToolCall {
        id: Some("c2".into()),
        name: "counter".into(),
        arguments: json!({}),
    });
    let stub = Arc::new(StubModel::new(vec![
        completion,
        ModelCompletion::text("both ran"),
    ]));
    let calls = Arc::new(AtomicUsize::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(CountingTool {
        calls: calls.clone(),
    });
    let mut agent = Agent::new(stub.clone()).with_tools(tools);

    agent.run("count twice").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let requests = stub.requests();
    let results: Vec<&Message> = requests[1]
        .iter()
        .filter(|m| m.tool_result.is_some())
        .collect();
    assert_eq!(results.len(), 2);
    // First call's result before the second's, each paired to its id.
    assert_eq!(
        results[0].tool_result.as_ref().unwrap().tool_call_id.as_deref(),
        Some("c1")
    );
    assert_eq!(
        results[0].tool_result.as_ref().unwrap().output,
        json!({"attempt": 1})
    );
    assert_eq!(
        results[1].tool_result.as_ref().unwrap().tool_call_id.as_deref(),
        Some("c2")
    );
}
