//! Video corpus abstraction for Klipp.
//!
//! The corpus has two faces: a chunk index for vector similarity search
//! over transcript chunks, and a video catalog for metadata, transcripts,
//! and playback id resolution. Both are trait-based so backends can be
//! swapped (SQLite for real use, in-memory for tests).

mod memory;
mod sqlite;

pub use memory::MemoryCorpus;
pub use sqlite::SqliteCorpus;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel similarity floor meaning "keep everything".
///
/// Cosine similarity is bounded below by -1.0, so retrieval with this floor
/// never filters a chunk by score. Relevance filtering belongs to the later
/// extraction stage, which sees full transcripts.
pub const NO_SIMILARITY_THRESHOLD: f32 = -1.0;

/// A transcript chunk stored in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Unique chunk ID.
    pub chunk_id: Uuid,
    /// Video this chunk belongs to.
    pub video_id: String,
    /// Storage asset the video was ingested from.
    pub asset_id: String,
    /// Order of this chunk in the video.
    pub chunk_index: i32,
    /// Transcript text of the chunk.
    pub text: String,
    /// Optional description of what is on screen during the chunk.
    pub visual_description: Option<String>,
    /// Start time in the video (seconds).
    pub start_seconds: f64,
    /// End time in the video (seconds).
    pub end_seconds: f64,
    /// Embedding vector.
    pub embedding: Vec<f32>,
}

impl ChunkRecord {
    /// Create a new chunk record with a fresh ID.
    pub fn new(
        video_id: String,
        asset_id: String,
        chunk_index: i32,
        text: String,
        start_seconds: f64,
        end_seconds: f64,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            chunk_id: Uuid::new_v4(),
            video_id,
            asset_id,
            chunk_index,
            text,
            visual_description: None,
            start_seconds,
            end_seconds,
            embedding,
        }
    }

    /// Attach a visual description.
    pub fn with_visual_description(mut self, description: String) -> Self {
        self.visual_description = Some(description);
        self
    }
}

/// A scored chunk returned by similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHit {
    /// Matched chunk ID.
    pub chunk_id: Uuid,
    /// Video the chunk belongs to.
    pub video_id: String,
    /// Storage asset the video was ingested from.
    pub asset_id: String,
    /// Transcript text of the chunk.
    pub text: String,
    /// Optional visual description.
    pub visual_description: Option<String>,
    /// Start time in the video (seconds).
    pub start_seconds: f64,
    /// End time in the video (seconds).
    pub end_seconds: f64,
    /// Cosine similarity to the query (higher is better).
    pub similarity: f32,
}

/// A chapter marker within a video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoChapter {
    /// Timestamp in "HH:MM:SS" format.
    pub start: String,
    /// Chapter title.
    pub title: String,
}

/// Catalog metadata for a single video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMeta {
    /// Video ID.
    pub video_id: String,
    /// Storage asset this video was ingested from.
    pub asset_id: String,
    /// Video title.
    pub title: String,
    /// Video description.
    pub description: String,
    /// Key topics covered by the video.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Chapter markers, if any.
    #[serde(default)]
    pub chapters: Vec<VideoChapter>,
}

/// Trait for transcript chunk indexes.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// Insert or replace chunks.
    async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<usize>;

    /// Vector similarity search over all chunks.
    ///
    /// Returns up to `limit` hits with similarity >= `min_similarity`,
    /// ordered by descending similarity. Pass [`NO_SIMILARITY_THRESHOLD`]
    /// to keep every hit regardless of score.
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<ChunkHit>>;

    /// Total indexed chunk count.
    async fn chunk_count(&self) -> Result<usize>;
}

/// Trait for video catalogs.
#[async_trait]
pub trait VideoCatalog: Send + Sync {
    /// Insert or replace a video's metadata and optional transcript.
    async fn upsert_video(&self, meta: &VideoMeta, transcript_vtt: Option<&str>) -> Result<()>;

    /// Register the playback ids available for a storage asset.
    async fn set_playback_ids(&self, asset_id: &str, playback_ids: &[String]) -> Result<()>;

    /// Fetch metadata for a set of videos. Unknown IDs are skipped.
    async fn videos_by_ids(&self, video_ids: &[String]) -> Result<Vec<VideoMeta>>;

    /// Resolve the public playback id for a storage asset.
    ///
    /// Returns the first registered playback id, or `None` when the asset is
    /// unknown or has none.
    async fn playback_id(&self, asset_id: &str) -> Result<Option<String>>;

    /// Fetch the WebVTT transcript for a video, if one is stored.
    async fn transcript_vtt(&self, video_id: &str) -> Result<Option<String>>;
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c)).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_no_threshold_sentinel_keeps_opposite_vectors() {
        // The sentinel must sit at the bottom of the cosine range
        let a = vec![1.0, 0.0];
        let d = vec![-1.0, 0.0];
        assert!(cosine_similarity(&a, &d) >= NO_SIMILARITY_THRESHOLD);
    }
}
