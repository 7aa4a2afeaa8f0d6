//! Configuration module for Klipp.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{ExtractionPrompts, Prompts};
pub use settings::{
    ChannelSettings, CorpusSettings, EmbeddingSettings, ExtractionSettings, GeneralSettings,
    JobStoreSettings, PromptSettings, RetrievalSettings, Settings,
};
