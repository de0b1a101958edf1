use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::line::DEFAULT_MENTION_NAME;
use crate::memory::generator::ModelNames;
use crate::memory::manager::{MemorySettings, MAX_SHORT_TERM_MESSAGES, MAX_TURNS};
use crate::memory::store::DB_FILENAME;

pub const DEFAULT_BIND: &str = "0.0.0.0:8000";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: Option<ServerConfig>,
    pub memory: Option<MemoryConfig>,
    pub model: Option<ModelConfig>,
    pub bot: Option<BotConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MemoryConfig {
    pub backend: Option<StoreBackend>,
    pub db_path: Option<PathBuf>,
    /// Completed exchanges before the window is summarized.
    pub max_turns: Option<u32>,
    pub max_short_term_messages: Option<usize>,
    /// Turn summarization off to keep only the capped verbatim window.
    pub summarization: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModelConfig {
    pub default: Option<String>,
    pub premium: Option<String>,
    /// Answer every participant with the premium model.
    pub use_premium: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BotConfig {
    pub mention_name: Option<String>,
    pub persona_file: Option<PathBuf>,
}

impl AppConfig {
    /// Missing file means defaults; a file that does not parse is an error.
    pub fn load() -> anyhow::Result<Self> {
        let Some(path) = config_path() else {
            return Ok(Self::default());
        };

        let Ok(contents) = std::fs::read_to_string(&path) else {
            return Ok(Self::default());
        };

        toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))
    }

    pub fn bind(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
    }

    pub fn store_backend(&self) -> StoreBackend {
        self.memory
            .as_ref()
            .and_then(|m| m.backend)
            .unwrap_or_default()
    }

    pub fn db_path(&self) -> PathBuf {
        self.memory
            .as_ref()
            .and_then(|m| m.db_path.clone())
            .unwrap_or_else(default_db_path)
    }

    pub fn models(&self) -> ModelNames {
        let defaults = ModelNames::default();
        let model = self.model.as_ref();
        ModelNames {
            default: model.and_then(|m| m.default.clone()).unwrap_or(defaults.default),
            premium: model.and_then(|m| m.premium.clone()).unwrap_or(defaults.premium),
        }
    }

    pub fn use_premium(&self) -> bool {
        self.model
            .as_ref()
            .and_then(|m| m.use_premium)
            .unwrap_or(false)
    }

    pub fn timeout(&self) -> Duration {
        self.model
            .as_ref()
            .and_then(|m| m.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(crate::llm::DEFAULT_TIMEOUT)
    }

    pub fn model_base_url(&self) -> Option<String> {
        self.model.as_ref().and_then(|m| m.base_url.clone())
    }

    /// Env `BOT_MENTION_NAME` wins over the file.
    pub fn mention_name(&self) -> String {
        std::env::var("BOT_MENTION_NAME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.bot.as_ref().and_then(|b| b.mention_name.clone()))
            .unwrap_or_else(|| DEFAULT_MENTION_NAME.to_string())
    }

    pub fn memory_settings(&self) -> anyhow::Result<MemorySettings> {
        let memory = self.memory.as_ref();
        let mut settings = MemorySettings {
            max_turns: memory.and_then(|m| m.max_turns).unwrap_or(MAX_TURNS).max(1),
            // Room for at least one full exchange.
            max_short_term_messages: memory
                .and_then(|m| m.max_short_term_messages)
                .unwrap_or(MAX_SHORT_TERM_MESSAGES)
                .max(2),
            summarization: memory.and_then(|m| m.summarization).unwrap_or(true),
            ..MemorySettings::default()
        };

        if let Some(path) = self.bot.as_ref().and_then(|b| b.persona_file.as_ref()) {
            let persona = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Cannot read persona {}: {}", path.display(), e))?;
            settings.persona = persona.trim().to_string();
        }
        Ok(settings)
    }
}

/// Secrets come from the environment only.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub gemini_api_key: String,
    pub line_access_token: String,
    pub line_channel_secret: String,
}

impl Credentials {
    pub fn from_env() -> anyhow::Result<Self> {
        // Project-local .env first, then the user-level one.
        let _ = dotenvy::dotenv();
        if let Some(dir) = base_dir() {
            let user_env = dir.join(".env");
            if user_env.exists() {
                let _ = dotenvy::from_path(user_env);
            }
        }

        Ok(Self {
            gemini_api_key: required_env("GEMINI_API_KEY")?,
            line_access_token: required_env("LINE_CHANNEL_ACCESS_TOKEN")?,
            line_channel_secret: required_env("LINE_CHANNEL_SECRET")?,
        })
    }
}

fn required_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} is not set", name))
}

fn base_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".adoka"))
}

fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("ADOKA_CONFIG") {
        return Some(PathBuf::from(p));
    }
    base_dir().map(|dir| dir.join("config.toml"))
}

fn default_db_path() -> PathBuf {
    base_dir()
        .unwrap_or_else(|| PathBuf::from(".adoka"))
        .join("memory")
        .join(DB_FILENAME)
}
