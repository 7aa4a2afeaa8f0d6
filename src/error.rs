//! Error types for Klipp.

use thiserror::Error;

/// Library-level error type for Klipp operations.
#[derive(Error, Debug)]
pub enum KlippError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Clip extraction failed: {0}")]
    Extraction(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Job store error: {0}")]
    JobStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for Klipp operations.
pub type Result<T> = std::result::Result<T, KlippError>;
