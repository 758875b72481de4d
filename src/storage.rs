//! Session persistence backends.
//!
//! All backends implement the same contract: a session round-trips through
//! `upsert` and `read` unchanged, and `get_all_session_ids` lists sessions
//! most-recently-updated first (session id breaks ties) without mutating
//! anything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;

#[cfg(feature = "persistence")]
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use crate::error::{AgentError, Result};
use crate::memory::AgentSession;

#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Prepare the backend (create tables, directories). Safe to call twice.
    async fn create(&self) -> Result<()>;
    async fn read(&self, session_id: &str) -> Result<Option<AgentSession>>;
    async fn upsert(&self, session: &AgentSession) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<()>;
    /// All session ids, newest `updated_at` first, optionally restricted to
    /// one user.
    async fn get_all_session_ids(&self, user_id: Option<&str>) -> Result<Vec<String>>;
    async fn get_all_sessions(&self, user_id: Option<&str>) -> Result<Vec<AgentSession>>;
}

fn user_matches(session: &AgentSession, user_id: Option<&str>) -> bool {
    match user_id {
        None => true,
        Some(user) => session.user_id.as_deref() == Some(user),
    }
}

fn sort_sessions(sessions: &mut [AgentSession]) {
    sessions.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local storage, for tests and throwaway sessions.
#[derive(Default)]
pub struct InMemorySessionStorage {
    sessions: Mutex<HashMap<String, AgentSession>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, AgentSession>>> {
        self.sessions
            .lock()
            .map_err(|_| AgentError::Storage("session map poisoned".into()))
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn create(&self) -> Result<()> {
        Ok(())
    }

    async fn read(&self, session_id: &str) -> Result<Option<AgentSession>> {
        Ok(self.lock()?.get(session_id).cloned())
    }

    async fn upsert(&self, session: &AgentSession) -> Result<()> {
        self.lock()?
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.lock()?.remove(session_id);
        Ok(())
    }

    async fn get_all_session_ids(&self, user_id: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .get_all_sessions(user_id)
            .await?
            .into_iter()
            .map(|s| s.session_id)
            .collect())
    }

    async fn get_all_sessions(&self, user_id: Option<&str>) -> Result<Vec<AgentSession>> {
        let mut sessions: Vec<AgentSession> = self
            .lock()?
            .values()
            .filter(|s| user_matches(s, user_id))
            .cloned()
            .collect();
        sort_sessions(&mut sessions);
        Ok(sessions)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File-backed
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFormat {
    Json,
    Yaml,
}

impl SessionFormat {
    fn extension(self) -> &'static str {
        match self {
            SessionFormat::Json => "json",
            SessionFormat::Yaml => "yaml",
        }
    }
}

/// One file per session under a directory, serialized as JSON or YAML.
pub struct FileSessionStorage {
    dir: PathBuf,
    format: SessionFormat,
}

impl FileSessionStorage {
    pub fn json(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            format: SessionFormat::Json,
        }
    }

    pub fn yaml(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            format: SessionFormat::Yaml,
        }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{session_id}.{}", self.format.extension()))
    }

    fn serialize(&self, session: &AgentSession) -> Result<String> {
        match self.format {
            SessionFormat::Json => Ok(serde_json::to_string_pretty(session)?),
            SessionFormat::Yaml => serde_yaml::to_string(session)
                .map_err(|err| AgentError::Storage(format!("yaml encode failed: {err}"))),
        }
    }

    fn deserialize(&self, raw: &str) -> Result<AgentSession> {
        match self.format {
            SessionFormat::Json => Ok(serde_json::from_str(raw)?),
            SessionFormat::Yaml => serde_yaml::from_str(raw)
                .map_err(|err| AgentError::Storage(format!("yaml decode failed: {err}"))),
        }
    }

    async fn load_from(&self, path: &Path) -> Result<Option<AgentSession>> {
        match fs::read_to_string(path).await {
            Ok(raw) => Ok(Some(self.deserialize(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AgentError::Storage(format!(
                "failed to read `{}`: {err}",
                path.display()
            ))),
        }
    }
}

#[async_trait]
impl SessionStorage for FileSessionStorage {
    async fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(|err| {
            AgentError::Storage(format!(
                "failed to create session dir `{}`: {err}",
                self.dir.display()
            ))
        })
    }

    async fn read(&self, session_id: &str) -> Result<Option<AgentSession>> {
        self.load_from(&self.session_path(session_id)).await
    }

    async fn upsert(&self, session: &AgentSession) -> Result<()> {
        self.create().await?;
        let path = self.session_path(&session.session_id);
        let raw = self.serialize(session)?;
        fs::write(&path, raw).await.map_err(|err| {
            AgentError::Storage(format!("failed to write `{}`: {err}", path.display()))
        })
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AgentError::Storage(format!(
                "failed to delete `{}`: {err}",
                path.display()
            ))),
        }
    }

    async fn get_all_session_ids(&self, user_id: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .get_all_sessions(user_id)
            .await?
            .into_iter()
            .map(|s| s.session_id)
            .collect())
    }

    async fn get_all_sessions(&self, user_id: Option<&str>) -> Result<Vec<AgentSession>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AgentError::Storage(format!(
                    "failed to list `{}`: {err}",
                    self.dir.display()
                )))
            }
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| AgentError::Storage(format!("failed to list sessions: {err}")))?
        {
            let path = entry.path();
            let matches_format = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext == self.format.extension())
                .unwrap_or(false);
            if !matches_format {
                continue;
            }
            if let Some(session) = self.load_from(&path).await? {
                if user_matches(&session, user_id) {
                    sessions.push(session);
                }
            }
        }
        sort_sessions(&mut sessions);
        Ok(sessions)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sqlite
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(feature = "persistence")]
pub struct SqliteSessionStorage {
    pool: SqlitePool,
}

#[cfg(feature = "persistence")]
impl SqliteSessionStorage {
    const INIT_STATEMENT: &'static str = r#"
        CREATE TABLE IF NOT EXISTS agent_sessions (
            session_id TEXT PRIMARY KEY,
            agent_id TEXT,
            user_id TEXT,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
    "#;

    pub async fn connect(connection_url: impl AsRef<str>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(connection_url.as_ref())
            .await
            .map_err(|err| {
                AgentError::Storage(format!(
                    "failed connecting to `{}`: {err}",
                    connection_url.as_ref()
                ))
            })?;
        let storage = Self { pool };
        storage.create().await?;
        Ok(storage)
    }

    fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<AgentSession> {
        let payload: String = row
            .try_get("payload")
            .map_err(|err| AgentError::Storage(format!("failed decoding session row: {err}")))?;
        serde_json::from_str(&payload)
            .map_err(|err| AgentError::Storage(format!("invalid session payload: {err}")))
    }
}

#[cfg(feature = "persistence")]
#[async_trait]
impl SessionStorage for SqliteSessionStorage {
    async fn create(&self) -> Result<()> {
        sqlx::query(Self::INIT_STATEMENT)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| AgentError::Storage(format!("failed initializing schema: {err}")))
    }

    async fn read(&self, session_id: &str) -> Result<Option<AgentSession>> {
        let row = sqlx::query("SELECT payload FROM agent_sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| AgentError::Storage(format!("failed reading session: {err}")))?;
        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn upsert(&self, session: &AgentSession) -> Result<()> {
        let payload = serde_json::to_string(session)?;
        sqlx::query(
            r#"
            INSERT INTO agent_sessions (session_id, agent_id, user_id, payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                agent_id = excluded.agent_id,
                user_id = excluded.user_id,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.agent_id)
        .bind(&session.user_id)
        .bind(payload)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|err| AgentError::Storage(format!("failed writing session: {err}")))
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM agent_sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| AgentError::Storage(format!("failed deleting session: {err}")))
    }

    async fn get_all_session_ids(&self, user_id: Option<&str>) -> Result<Vec<String>> {
        let rows = match user_id {
            Some(user) => {
                sqlx::query(
                    "SELECT session_id FROM agent_sessions WHERE user_id = ? ORDER BY updated_at DESC, session_id ASC",
                )
                .bind(user)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT session_id FROM agent_sessions ORDER BY updated_at DESC, session_id ASC",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|err| AgentError::Storage(format!("failed listing sessions: {err}")))?;
        rows.into_iter()
            .map(|row| {
                row.try_get("session_id")
                    .map_err(|err| AgentError::Storage(format!("failed decoding id: {err}")))
            })
            .collect()
    }

    async fn get_all_sessions(&self, user_id: Option<&str>) -> Result<Vec<AgentSession>> {
        let rows = match user_id {
            Some(user) => {
                sqlx::query(
                    "SELECT payload FROM agent_sessions WHERE user_id = ? ORDER BY updated_at DESC, session_id ASC",
                )
                .bind(user)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT payload FROM agent_sessions ORDER BY updated_at DESC, session_id ASC",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|err| AgentError::Storage(format!("failed listing sessions: {err}")))?;
        rows.iter().map(Self::decode_row).collect()
    }
}
