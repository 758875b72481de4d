//! TOML configuration with environment-variable overrides, plus factories
//! that turn config sections into live model and storage instances.

use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::error::{AgentError, Result};
use crate::llm::{AnthropicClient, GeminiClient, GroqClient, LanguageModel, OpenAIClient};
use crate::reasoning::ReasoningDelegate;
use crate::storage::{FileSessionStorage, InMemorySessionStorage, SessionStorage};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: usize,
    #[serde(default)]
    pub tool_call_limit: Option<usize>,
    #[serde(default)]
    pub history_window: Option<usize>,
    #[serde(default)]
    pub reasoning: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instructions: default_instructions(),
            max_steps: default_max_steps(),
            retry_limit: default_retry_limit(),
            tool_call_limit: None,
            history_window: None,
            reasoning: false,
        }
    }
}

fn default_instructions() -> String {
    "You are a helpful agent.".into()
}

fn default_max_steps() -> usize {
    10
}

fn default_retry_limit() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Json,
    Yaml,
    Sqlite,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            sessions_dir: default_sessions_dir(),
            database_url: None,
        }
    }
}

fn default_sessions_dir() -> String {
    "sessions".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|err| AgentError::Config(format!("failed to parse configuration: {err}")))
    }

    /// Loads from file, then applies `AGENTRY_*` environment overrides.
    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        if let Ok(provider) = env::var("AGENTRY_PROVIDER") {
            cfg.model.provider = provider;
        }
        if let Ok(model) = env::var("AGENTRY_MODEL") {
            cfg.model.model = Some(model);
        }
        if let Ok(key) = env::var("AGENTRY_API_KEY") {
            cfg.model.api_key = Some(key);
        }
        if let Ok(base_url) = env::var("AGENTRY_BASE_URL") {
            cfg.model.base_url = Some(base_url);
        }
        if let Ok(steps) = env::var("AGENTRY_MAX_STEPS") {
            if let Ok(parsed) = steps.parse::<usize>() {
                cfg.agent.max_steps = parsed;
            }
        }
        if let Ok(backend) = env::var("AGENTRY_STORAGE_BACKEND") {
            cfg.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "json" => StorageBackend::Json,
                "yaml" => StorageBackend::Yaml,
                "sqlite" => StorageBackend::Sqlite,
                _ => StorageBackend::Memory,
            };
        }
        if let Ok(dir) = env::var("AGENTRY_SESSIONS_DIR") {
            cfg.storage.sessions_dir = dir;
        }
        if let Ok(url) = env::var("AGENTRY_DATABASE_URL") {
            cfg.storage.database_url = Some(url);
        }
        Ok(cfg)
    }

    /// Instantiates the configured provider client.
    pub fn build_model(&self) -> Result<Arc<dyn LanguageModel>> {
        let model_cfg = &self.model;
        let api_key = || {
            model_cfg
                .api_key
                .clone()
                .ok_or_else(|| AgentError::Config("model.api_key is required".into()))
        };
        let model_name = |fallback: &str| {
            model_cfg
                .model
                .clone()
                .unwrap_or_else(|| fallback.to_string())
        };

        match model_cfg.provider.to_ascii_lowercase().as_str() {
            "openai" => {
                let mut client = OpenAIClient::new(api_key()?, model_name("gpt-4o"))?;
                if let Some(base_url) = &model_cfg.base_url {
                    client = client.with_base_url(base_url.clone());
                }
                if let Some(org) = &model_cfg.organization {
                    client = client.with_organization(org.clone());
                }
                Ok(Arc::new(client))
            }
            "anthropic" => {
                let mut client =
                    AnthropicClient::new(api_key()?, model_name("claude-sonnet-4-20250514"))?;
                if let Some(base_url) = &model_cfg.base_url {
                    client = client.with_endpoint(base_url.clone());
                }
                Ok(Arc::new(client))
            }
            "gemini" => {
                let mut client = GeminiClient::new(api_key()?, model_name("gemini-2.0-flash"))?;
                if let Some(base_url) = &model_cfg.base_url {
                    client = client.with_endpoint(base_url.clone());
                }
                Ok(Arc::new(client))
            }
            "groq" => {
                let client = GroqClient::new(api_key()?)?;
                Ok(Arc::new(match &model_cfg.model {
                    Some(model) => client.with_model(model.clone()),
                    None => client,
                }))
            }
            other => Err(AgentError::Config(format!("unknown provider `{other}`"))),
        }
    }

    /// Instantiates the configured session storage backend.
    pub async fn build_storage(&self) -> Result<Arc<dyn SessionStorage>> {
        let storage: Arc<dyn SessionStorage> = match self.storage.backend {
            StorageBackend::Memory => Arc::new(InMemorySessionStorage::new()),
            StorageBackend::Json => Arc::new(FileSessionStorage::json(&self.storage.sessions_dir)),
            StorageBackend::Yaml => Arc::new(FileSessionStorage::yaml(&self.storage.sessions_dir)),
            StorageBackend::Sqlite => {
                #[cfg(feature = "persistence")]
                {
                    let url = self.storage.database_url.as_deref().ok_or_else(|| {
                        AgentError::Config("storage.database_url is required for sqlite".into())
                    })?;
                    Arc::new(crate::storage::SqliteSessionStorage::connect(url).await?)
                }
                #[cfg(not(feature = "persistence"))]
                {
                    return Err(AgentError::Config(
                        "sqlite storage requires the `persistence` feature".into(),
                    ));
                }
            }
        };
        storage.create().await?;
        Ok(storage)
    }

    /// Builds a ready-to-run agent from the whole config. With
    /// `agent.reasoning` set, the same model doubles as the reasoning
    /// delegate.
    pub async fn build_agent(&self) -> Result<Agent> {
        let model = self.build_model()?;
        let storage = self.build_storage().await?;
        let mut agent = Agent::new(model.clone())
            .with_instructions(self.agent.instructions.clone())
            .with_max_steps(self.agent.max_steps)
            .with_retry_limit(self.agent.retry_limit)
            .with_storage(storage);
        if self.agent.reasoning {
            agent = agent.with_reasoning(ReasoningDelegate::new(model));
        }
        if let Some(limit) = self.agent.tool_call_limit {
            agent = agent.with_tool_call_limit(limit);
        }
        if let Some(window) = self.agent.history_window {
            agent = agent.with_history_window(window);
        }
        Ok(agent)
    }
}
