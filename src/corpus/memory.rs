//! In-memory corpus implementation.
//!
//! Useful for testing and small datasets.

use super::{
    cosine_similarity, ChunkHit, ChunkIndex, ChunkRecord, VideoCatalog, VideoMeta,
};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory chunk index and video catalog.
pub struct MemoryCorpus {
    chunks: RwLock<HashMap<Uuid, ChunkRecord>>,
    videos: RwLock<HashMap<String, VideoMeta>>,
    transcripts: RwLock<HashMap<String, String>>,
    playback_ids: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryCorpus {
    /// Create a new empty corpus.
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
            videos: RwLock::new(HashMap::new()),
            transcripts: RwLock::new(HashMap::new()),
            playback_ids: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCorpus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkIndex for MemoryCorpus {
    async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<usize> {
        let mut store = self.chunks.write().unwrap();
        for chunk in chunks {
            store.insert(chunk.chunk_id, chunk.clone());
        }
        Ok(chunks.len())
    }

    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<ChunkHit>> {
        let chunks = self.chunks.read().unwrap();

        let mut hits: Vec<ChunkHit> = chunks
            .values()
            .map(|chunk| ChunkHit {
                chunk_id: chunk.chunk_id,
                video_id: chunk.video_id.clone(),
                asset_id: chunk.asset_id.clone(),
                text: chunk.text.clone(),
                visual_description: chunk.visual_description.clone(),
                start_seconds: chunk.start_seconds,
                end_seconds: chunk.end_seconds,
                similarity: cosine_similarity(query_embedding, &chunk.embedding),
            })
            .filter(|hit| hit.similarity >= min_similarity)
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        Ok(hits)
    }

    async fn chunk_count(&self) -> Result<usize> {
        let chunks = self.chunks.read().unwrap();
        Ok(chunks.len())
    }
}

#[async_trait]
impl VideoCatalog for MemoryCorpus {
    async fn upsert_video(&self, meta: &VideoMeta, transcript_vtt: Option<&str>) -> Result<()> {
        let mut videos = self.videos.write().unwrap();
        videos.insert(meta.video_id.clone(), meta.clone());

        if let Some(vtt) = transcript_vtt {
            let mut transcripts = self.transcripts.write().unwrap();
            transcripts.insert(meta.video_id.clone(), vtt.to_string());
        }

        Ok(())
    }

    async fn set_playback_ids(&self, asset_id: &str, playback_ids: &[String]) -> Result<()> {
        let mut assets = self.playback_ids.write().unwrap();
        assets.insert(asset_id.to_string(), playback_ids.to_vec());
        Ok(())
    }

    async fn videos_by_ids(&self, video_ids: &[String]) -> Result<Vec<VideoMeta>> {
        let videos = self.videos.read().unwrap();
        Ok(video_ids
            .iter()
            .filter_map(|id| videos.get(id).cloned())
            .collect())
    }

    async fn playback_id(&self, asset_id: &str) -> Result<Option<String>> {
        let assets = self.playback_ids.read().unwrap();
        Ok(assets
            .get(asset_id)
            .and_then(|ids| ids.first())
            .cloned())
    }

    async fn transcript_vtt(&self, video_id: &str) -> Result<Option<String>> {
        let transcripts = self.transcripts.read().unwrap();
        Ok(transcripts.get(video_id).cloned())
    }
}
