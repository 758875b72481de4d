//! In-run conversation memory and the persisted session record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::{Message, Role};

/// The live transcript of a session, including transient messages that never
/// reach storage.
#[derive(Default, Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
}

impl ConversationMemory {
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The prompt view of the transcript: system messages always included,
    /// the rest optionally limited to the last `window` messages.
    pub fn context(&self, window: Option<usize>) -> Vec<Message> {
        let Some(window) = window else {
            return self.messages.clone();
        };
        let non_system: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();
        if non_system.len() <= window {
            return self.messages.clone();
        }

        let mut result: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();
        let start = non_system.len() - window;
        result.extend(non_system[start..].iter().map(|m| (*m).clone()));
        result
    }

    /// Messages in their storage form. Transient messages are dropped and
    /// provider blobs stripped.
    pub fn sanitized(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter_map(Message::sanitized_for_storage)
            .collect()
    }
}

/// One persisted session row. This is the unit the storage contract
/// round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSession {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub memory: Vec<Message>,
    /// Caller-owned state carried across runs.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub session_data: Map<String, Value>,
    /// Caller-provided digest of the conversation, persisted alongside the
    /// transcript and carried across runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            agent_id: None,
            user_id: None,
            memory: Vec::new(),
            session_data: Map::new(),
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Snapshot of the current memory ready for storage. `updated_at` moves,
    /// `created_at` does not.
    pub fn capture(&mut self, memory: &ConversationMemory) {
        self.memory = memory.sanitized();
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_window_keeps_system_messages() {
        let mut memory = ConversationMemory::default();
        memory.push(Message::system("instructions"));
        memory.push(Message::user("one"));
        memory.push(Message::assistant("two"));
        memory.push(Message::user("three"));
        memory.push(Message::assistant("four"));

        let context = memory.context(Some(2));
        assert_eq!(context.len(), 3);
        assert_eq!(context[0].role, Role::System);
        assert_eq!(context[1].content, "three");
        assert_eq!(context[2].content, "four");
    }

    #[test]
    fn capture_drops_transient_messages_and_provider_blobs() {
        let mut memory = ConversationMemory::default();
        memory.push(Message::user("question"));
        memory.push(Message::assistant("<thinking>trace</thinking>").transient());
        let mut answer = Message::assistant("answer");
        answer.extra.insert("parts".into(), json!([{"text": "answer"}]));
        memory.push(answer);

        let mut session = AgentSession::new("s1");
        session.summary = Some("asked a question".into());
        let created = session.created_at;
        session.capture(&memory);

        assert_eq!(session.memory.len(), 2);
        assert!(session.memory.iter().all(|m| m.persist));
        assert!(session.memory[1].extra.get("parts").is_none());
        // The snapshot replaces the transcript, not the caller's summary.
        assert_eq!(session.summary.as_deref(), Some("asked a question"));
        assert_eq!(session.created_at, created);
        assert!(session.updated_at >= created);
    }
}
