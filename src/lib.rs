//! Klipp - Semantic Video Clip Search
//!
//! Searches a video library by meaning and extracts the exact clips that
//! answer a query.
//!
//! The name "Klipp" comes from the Norwegian word for "clip."
//!
//! # Overview
//!
//! Klipp allows you to:
//! - Retrieve transcript chunks by vector similarity
//! - Rank and aggregate chunk hits into candidate videos
//! - Extract precise, timestamped clips per video with an LLM
//! - Stream results over per-search channels with scoped tokens
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration and prompt management
//! - `corpus` - Chunk index and video catalog storage
//! - `embedding` - Embedding generation
//! - `retrieval` - Vector search over transcript chunks
//! - `ranking` - Per-video aggregation of chunk hits
//! - `extraction` - LLM clip extraction workers
//! - `channel` - Per-search pub/sub delivery
//! - `merge` - Client-side result merging
//! - `job_store` - Polled job status fallback
//! - `checkpoint` - Resumable pipeline stage records
//! - `orchestrator` - Pipeline coordination
//!
//! # Example
//!
//! ```rust,no_run
//! use klipp::config::Settings;
//! use klipp::orchestrator::{Orchestrator, SearchRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(settings)?;
//!
//!     let request = SearchRequest::new("how do codecs trade quality for size");
//!     let token = orchestrator.broker().issue_token(request.search_id);
//!     let mut subscription = orchestrator.broker().subscribe(&token)?;
//!
//!     orchestrator.run(request).await?;
//!     while let Some(envelope) = subscription.recv().await {
//!         println!("{:?}", envelope.event);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod job_store;
pub mod merge;
pub mod openai;
pub mod orchestrator;
pub mod ranking;
pub mod retrieval;
pub mod vtt;

pub use error::{KlippError, Result};
