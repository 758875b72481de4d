//! Session persistence through the agent and directly against the backends.

use std::sync::Arc;

use serde_json::{json, Map};

use agentry::{
    Agent, AgentSession, FileSessionStorage, InMemorySessionStorage, Message, ModelCompletion,
    Role, SessionStorage, StubModel,
};

#[cfg(feature = "persistence")]
use agentry::SqliteSessionStorage;

#[tokio::test]
async fn a_run_persists_the_session_synchronously() {
    let storage = Arc::new(InMemorySessionStorage::new());
    let stub = Arc::new(StubModel::new(vec![ModelCompletion::text("hello")]));
    let mut agent = Agent::new(stub)
        .with_storage(storage.clone())
        .with_session_id("s-run")
        .with_agent_id("agent-1")
        .with_user_id("user-1");

    agent.run("hi").await.unwrap();

    let stored = storage.read("s-run").await.unwrap().unwrap();
    assert_eq!(stored.agent_id.as_deref(), Some("agent-1"));
    assert_eq!(stored.user_id.as_deref(), Some("user-1"));
    let roles: Vec<Role> = stored.memory.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
}

#[tokio::test]
async fn persisted_memory_excludes_transient_messages_and_provider_blobs() {
    let storage = Arc::new(InMemorySessionStorage::new());
    let mut completion = ModelCompletion::text("answer");
    completion.extra = {
        let mut extra = Map::new();
        extra.insert("parts".into(), json!([{"text": "answer"}]));
        extra
    };
    let reasoning_stub = Arc::new(StubModel::new(vec![ModelCompletion::text(
        "free-form deliberation",
    )]));
    let mut agent = Agent::new(Arc::new(StubModel::new(vec![completion])))
        .with_storage(storage.clone())
        .with_session_id("s-clean")
        .with_reasoning(agentry::ReasoningDelegate::new(reasoning_stub));

    agent.run("question").await.unwrap();

    // The live transcript has the thinking message; storage does not.
    assert!(agent
        .memory()
        .messages()
        .iter()
        .any(|m| m.content.contains("<thinking>")));
    let stored = storage.read("s-clean").await.unwrap().unwrap();
    assert!(stored
        .memory
        .iter()
        .all(|m| !m.content.contains("<thinking>")));
    let assistant = stored
        .memory
        .iter()
        .find(|m| m.role == Role::Assistant)
        .unwrap();
    assert!(assistant.extra.get("parts").is_none());
}

#[tokio::test]
async fn a_new_agent_resumes_a_stored_session() {
    let storage = Arc::new(InMemorySessionStorage::new());

    let mut first = Agent::new(Arc::new(StubModel::new(vec![ModelCompletion::text(
        "nice to meet you, Ada",
    )])))
    .with_storage(storage.clone())
    .with_session_id("s-resume");
    first.run("my name is Ada").await.unwrap();

    let stub = Arc::new(StubModel::new(vec![ModelCompletion::text("Ada")]));
    let mut second = Agent::new(stub.clone())
        .with_storage(storage.clone())
        .with_session_id("s-resume");
    second.run("what is my name?").await.unwrap();

    // The resumed run's request contains the first exchange.
    let requests = stub.requests();
    let request = &requests[0];
    assert!(request.iter().any(|m| m.content.contains("my name is Ada")));

    let stored = storage.read("s-resume").await.unwrap().unwrap();
    let users = stored
        .memory
        .iter()
        .filter(|m| m.role == Role::User)
        .count();
    assert_eq!(users, 2);
}

#[tokio::test]
async fn a_resumed_session_keeps_its_summary() {
    let storage = Arc::new(InMemorySessionStorage::new());
    let mut seeded = AgentSession::new("s-sum");
    seeded.summary = Some("user introduced themselves".into());
    seeded.memory.push(Message::user("my name is Ada"));
    storage.upsert(&seeded).await.unwrap();

    let mut agent = Agent::new(Arc::new(StubModel::new(vec![ModelCompletion::text("hi")])))
        .with_storage(storage.clone())
        .with_session_id("s-sum");
    agent.run("hello again").await.unwrap();

    // Re-persisting after the run keeps the stored summary intact.
    let stored = storage.read("s-sum").await.unwrap().unwrap();
    assert_eq!(stored.summary.as_deref(), Some("user introduced themselves"));
    assert!(stored.memory.len() > 1);
}

async fn assert_contract(storage: &dyn SessionStorage) {
    storage.create().await.unwrap();
    // create() twice is safe.
    storage.create().await.unwrap();

    let mut older = AgentSession::new("older");
    older.user_id = Some("ada".into());
    older.memory.push(Message::user("old news"));
    older.updated_at = chrono::Utc::now() - chrono::Duration::minutes(5);
    storage.upsert(&older).await.unwrap();

    let mut newer = AgentSession::new("newer");
    newer.memory.push(Message::user("fresh"));
    newer.memory.push(Message::assistant("reply"));
    newer.summary = Some("a fresh exchange".into());
    storage.upsert(&newer).await.unwrap();

    // Equality covers the transcript, session_data, and the summary.
    let loaded = storage.read("newer").await.unwrap().unwrap();
    assert_eq!(loaded, newer);
    assert_eq!(loaded.summary.as_deref(), Some("a fresh exchange"));
    assert!(storage.read("missing").await.unwrap().is_none());

    let ids = storage.get_all_session_ids(None).await.unwrap();
    assert_eq!(ids, vec!["newer".to_string(), "older".to_string()]);
    // Listing does not mutate anything.
    assert_eq!(storage.get_all_session_ids(None).await.unwrap(), ids);
    assert_eq!(storage.get_all_sessions(None).await.unwrap().len(), 2);

    // The user filter only sees that user's sessions.
    let filtered = storage.get_all_session_ids(Some("ada")).await.unwrap();
    assert_eq!(filtered, vec!["older".to_string()]);
    assert!(storage
        .get_all_session_ids(Some("nobody"))
        .await
        .unwrap()
        .is_empty());

    storage.delete("older").await.unwrap();
    // Deleting a missing session is not an error.
    storage.delete("older").await.unwrap();
    assert_eq!(
        storage.get_all_session_ids(None).await.unwrap(),
        vec!["newer".to_string()]
    );
}

#[tokio::test]
async fn in_memory_backend_honors_the_contract() {
    assert_contract(&InMemorySessionStorage::new()).await;
}

#[tokio::test]
async fn json_file_backend_honors_the_contract() {
    let dir = tempfile::tempdir().unwrap();
    assert_contract(&FileSessionStorage::json(dir.path())).await;
}

#[tokio::test]
async fn yaml_file_backend_honors_the_contract() {
    let dir = tempfile::tempdir().unwrap();
    assert_contract(&FileSessionStorage::yaml(dir.path())).await;
}

#[cfg(feature = "persistence")]
#[tokio::test]
async fn sqlite_backend_honors_the_contract() {
    let storage = SqliteSessionStorage::connect("sqlite::memory:").await.unwrap();
    assert_contract(&storage).await;
}

#[tokio::test]
async fn upsert_replaces_rather_than_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileSessionStorage::json(dir.path());

    let mut session = AgentSession::new("s1");
    session.memory.push(Message::user("v1"));
    storage.upsert(&session).await.unwrap();

    session.memory.push(Message::assistant("v2"));
    session.updated_at = chrono::Utc::now();
    storage.upsert(&session).await.unwrap();

    let sessions = storage.get_all_sessions(None).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].memory.len(), 2);
}
