//! Attune configuration
//!
//! Loaded once at startup from TOML. Lookup order for the file:
//! `--config`, then `ATTUNE_CONFIG`, then `<config dir>/attune/config.toml`.
//! Missing sections and keys take the defaults below.

use crate::composer::KnowledgePrecedence;
use crate::error::ConfigError;
use crate::sanitize::FALLBACK_MESSAGE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "ATTUNE_CONFIG";
const CONFIG_DIR: &str = "attune";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub pipeline: PipelineSettings,
    pub stream: StreamConfig,
    pub context: ContextSettings,
    pub classifier: ClassifierSettings,
    pub backend: BackendSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Non-neutral emotions above this confidence are salient
    pub salience_threshold: f64,
    pub knowledge_precedence: KnowledgePrecedence,
    pub generation_timeout_secs: u64,
    pub fallback_message: String,
    pub agent_name: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            salience_threshold: 0.6,
            knowledge_precedence: KnowledgePrecedence::EmpathyFirst,
            generation_timeout_secs: 60,
            fallback_message: FALLBACK_MESSAGE.to_string(),
            agent_name: "Attune".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub chunk_words: usize,
    pub chunk_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_words: 5,
            chunk_delay_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub max_chars: usize,
    pub max_turns: usize,
    pub self_contained_min_chars: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_chars: 300,
            max_turns: 3,
            self_contained_min_chars: 40,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// JSON lexicon replacing the built-in weights
    pub lexicon_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Ollama,
    OpenAI,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ollama => "ollama",
            BackendKind::OpenAI => "openai",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub kind: BackendKind,
    /// Base URL for Ollama, full completions URL for OpenAI-compatible servers
    pub url: Option<String>,
    pub model: String,
    pub temperature: f32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::Ollama,
            url: None,
            model: "llama3.2".to_string(),
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub kind: StorageKind,
    pub database_path: Option<PathBuf>,
}

impl StorageSettings {
    /// Configured path, or `attune.db` in the platform data dir.
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(CONFIG_DIR)
                .join("attune.db")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Explicit path, then `ATTUNE_CONFIG`, then the user config dir. With
    /// no file anywhere the defaults are used.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_path(Path::new(&path));
        }
        match default_path() {
            Some(path) if path.exists() => Self::from_path(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.pipeline.salience_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "pipeline.salience_threshold must be in [0, 1], got {}",
                threshold
            )));
        }
        if self.pipeline.generation_timeout_secs == 0 {
            return Err(ConfigError::Invalid("pipeline.generation_timeout_secs must be positive".into()));
        }
        if self.pipeline.fallback_message.trim().is_empty() {
            return Err(ConfigError::Invalid("pipeline.fallback_message must not be empty".into()));
        }
        if self.stream.chunk_words == 0 {
            return Err(ConfigError::Invalid("stream.chunk_words must be at least 1".into()));
        }
        if self.context.max_chars == 0 || self.context.max_turns == 0 {
            return Err(ConfigError::Invalid("context.max_chars and context.max_turns must be positive".into()));
        }
        Ok(())
    }
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.pipeline.salience_threshold, 0.6);
        assert_eq!(config.pipeline.knowledge_precedence, KnowledgePrecedence::EmpathyFirst);
        assert_eq!(config.stream.chunk_words, 5);
        assert_eq!(config.stream.chunk_delay_ms, 50);
        assert_eq!(config.context.max_chars, 300);
        assert_eq!(config.backend.kind, BackendKind::Ollama);
        assert_eq!(config.storage.kind, StorageKind::Memory);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let raw = r#"
            [pipeline]
            knowledge_precedence = "knowledge_first"
            agent_name = "Sol"

            [backend]
            kind = "openai"
            model = "gpt-4o-mini"

            [storage]
            kind = "sqlite"
            database_path = "/tmp/attune-test.db"
        "#;
        let config = Config::from_toml(raw).unwrap();
        assert_eq!(config.pipeline.knowledge_precedence, KnowledgePrecedence::KnowledgeFirst);
        assert_eq!(config.pipeline.agent_name, "Sol");
        assert_eq!(config.pipeline.generation_timeout_secs, 60);
        assert_eq!(config.backend.kind, BackendKind::OpenAI);
        assert_eq!(config.backend.temperature, 0.7);
        assert_eq!(config.storage.resolved_database_path(), PathBuf::from("/tmp/attune-test.db"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_toml("[pipeline]\nsalience_threshold = 1.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml("[stream]\nchunk_words = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(Config::from_toml("[server]\nport = \"x\""), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn loads_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nport = 9123\n[logging]\njson = true\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9123);
        assert!(config.logging.json);

        let missing = dir.path().join("nope.toml");
        assert!(matches!(Config::load(Some(&missing)), Err(ConfigError::Read { .. })));
    }
}
