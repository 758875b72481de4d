//! Minimal end-to-end example: a scripted model driving the calculator
//! toolkit, with session persistence and streamed run events.
//!
//! Swap `StubModel` for `OpenAIClient::from_env("gpt-4o")?` (or any other
//! provider client) to talk to a real model.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use agentry::toolkits::calculator_toolkit;
use agentry::{Agent, InMemorySessionStorage, ModelCompletion, RunEvent, SessionStorage, StubModel};

#[tokio::main]
async fn main() -> agentry::Result<()> {
    agentry::init_tracing();

    let model = Arc::new(StubModel::new(vec![
        ModelCompletion::tool_call("multiply", json!({"a": 6, "b": 7}), Some("call_1".into())),
        ModelCompletion::text("6 * 7 = **42**."),
    ]));
    let storage = Arc::new(InMemorySessionStorage::new());

    let mut agent = Agent::new(model)
        .with_instructions("You are a math assistant. Use the calculator tools.")
        .with_toolkit(calculator_toolkit())
        .with_storage(storage.clone())
        .with_session_id("quickstart");

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let response = agent.run_stream("What is 6 times 7?", sender).await?;

    while let Ok(event) = receiver.try_recv() {
        match event.event {
            RunEvent::ToolCallStarted => {
                for call in &event.tool_calls {
                    println!("-> {}({})", call.name, call.arguments);
                }
            }
            RunEvent::ToolCallCompleted => {
                if let Some(result) = &event.tool_result {
                    println!("<- {}", result.output);
                }
            }
            _ => {}
        }
    }

    println!("{}", response.text());

    let ids = storage.get_all_session_ids(None).await?;
    println!("persisted sessions: {ids:?}");
    Ok(())
}
