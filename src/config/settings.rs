//! Configuration settings for Klipp.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
    pub extraction: ExtractionSettings,
    pub channel: ChannelSettings,
    pub job_store: JobStoreSettings,
    pub corpus: CorpusSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.klipp".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding provider (openai).
    pub provider: String,
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions (must match the corpus index).
    pub dimensions: u32,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

/// Vector retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Chunks fetched per query. Large on purpose: retrieval is
    /// recall-oriented and the extraction stage does the precision work.
    pub chunk_limit: usize,
    /// Candidate videos kept after aggregation.
    pub top_videos: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            chunk_limit: 150,
            top_videos: 10,
        }
    }
}

/// Clip extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Model used for clip selection.
    pub model: String,
    /// Concurrent extraction workers per search. Bounded to respect model
    /// API rate limits.
    pub batch_size: usize,
    /// Per-attempt deadline for one generation call.
    pub timeout_seconds: u64,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Base backoff between attempts, doubled each retry.
    pub retry_backoff_ms: u64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            model: "gpt-5-mini".to_string(),
            batch_size: 3,
            timeout_seconds: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

/// Delivery channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Lifetime of subscription tokens in seconds.
    pub token_ttl_seconds: i64,
    /// Idle retention of channel backlogs in seconds.
    pub retention_seconds: i64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            token_ttl_seconds: 300,
            retention_seconds: 600,
        }
    }
}

/// Fallback job store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStoreSettings {
    /// Retention of job state entries in seconds.
    pub ttl_seconds: i64,
}

impl Default for JobStoreSettings {
    fn default() -> Self {
        Self { ttl_seconds: 600 }
    }
}

/// Corpus store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusSettings {
    /// Corpus provider (sqlite, memory).
    pub provider: String,
    /// Path to the SQLite database (for the sqlite provider).
    pub sqlite_path: String,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            provider: "sqlite".to_string(),
            sqlite_path: "~/.klipp/corpus.db".to_string(),
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::KlippError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("klipp")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.corpus.sqlite_path)
    }
}
