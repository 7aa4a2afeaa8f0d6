//! Candidate aggregation: turn chunk hits into ranked video candidates.
//!
//! Retrieval returns loose chunks; playback and extraction operate on whole
//! videos. Grouping happens here, along with catalog metadata resolution.

use crate::corpus::{ChunkHit, VideoCatalog, VideoChapter};
use crate::error::Result;
use crate::extraction::Clip;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Default number of candidate videos per search.
pub const DEFAULT_TOP_VIDEOS: usize = 10;

/// A video selected as a search candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoCandidate {
    /// Video ID.
    pub video_id: String,
    /// Storage asset the video was ingested from.
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
    /// Public playback id for streaming the video.
    pub playback_id: String,
    /// Best chunk similarity for this video (higher is better).
    pub top_similarity: f32,
}

/// A candidate video together with its extracted clips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSearchResult {
    pub video: VideoCandidate,
    pub clips: Vec<Clip>,
}

impl VideoSearchResult {
    /// A provisional result: candidate known, clips still pending.
    pub fn provisional(video: VideoCandidate) -> Self {
        Self {
            video,
            clips: Vec::new(),
        }
    }
}

/// Rank video ids by their best chunk similarity, descending.
///
/// A video's score is the maximum similarity over its hits, so one strong
/// chunk beats many mediocre ones. Ties break on ascending video id to keep
/// the ordering deterministic across runs.
pub fn rank_video_ids(hits: &[ChunkHit]) -> Vec<(String, f32)> {
    let mut best: HashMap<String, f32> = HashMap::new();
    for hit in hits {
        best.entry(hit.video_id.clone())
            .and_modify(|score| *score = score.max(hit.similarity))
            .or_insert(hit.similarity);
    }

    let mut ranked: Vec<(String, f32)> = best.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    ranked
}

/// Groups chunk hits into playable, metadata-complete video candidates.
pub struct Aggregator {
    catalog: Arc<dyn VideoCatalog>,
    top_k: usize,
}

impl Aggregator {
    /// Create an aggregator with the default candidate count.
    pub fn new(catalog: Arc<dyn VideoCatalog>) -> Self {
        Self {
            catalog,
            top_k: DEFAULT_TOP_VIDEOS,
        }
    }

    /// Set the maximum number of candidate videos.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Aggregate chunk hits into the top candidate videos.
    ///
    /// Videos without catalog metadata or without a resolvable playback id
    /// are dropped before the top-K cut, so an unplayable video never costs
    /// the search one of its slots.
    #[instrument(skip(self, hits), fields(hits = hits.len()))]
    pub async fn aggregate(&self, hits: &[ChunkHit]) -> Result<Vec<VideoCandidate>> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ranked = rank_video_ids(hits);
        debug!("Ranked {} distinct videos", ranked.len());

        let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let metas = self.catalog.videos_by_ids(&ids).await?;
        let meta_by_id: HashMap<&str, _> = metas
            .iter()
            .map(|meta| (meta.video_id.as_str(), meta))
            .collect();

        let mut candidates = Vec::new();
        for (video_id, top_similarity) in &ranked {
            if candidates.len() >= self.top_k {
                break;
            }

            let Some(meta) = meta_by_id.get(video_id.as_str()) else {
                warn!("Dropping video {}: no catalog metadata", video_id);
                continue;
            };

            let Some(playback_id) = self.catalog.playback_id(&meta.asset_id).await? else {
                warn!(
                    "Dropping video {}: asset {} has no playback id",
                    video_id, meta.asset_id
                );
                continue;
            };

            candidates.push(VideoCandidate {
                video_id: meta.video_id.clone(),
                asset_id: meta.asset_id.clone(),
                title: meta.title.clone(),
                description: meta.description.clone(),
                topics: meta.topics.clone(),
                chapters: meta.chapters.clone(),
                playback_id,
                top_similarity: *top_similarity,
            });
        }

        debug!("Aggregated {} candidates", candidates.len());
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{MemoryCorpus, VideoMeta};
    use uuid::Uuid;

    fn hit(video_id: &str, similarity: f32) -> ChunkHit {
        ChunkHit {
            chunk_id: Uuid::new_v4(),
            video_id: video_id.to_string(),
            asset_id: format!("asset-{}", video_id),
            text: "text".to_string(),
            visual_description: None,
            start_seconds: 0.0,
            end_seconds: 30.0,
            similarity,
        }
    }

    async fn seed_video(corpus: &MemoryCorpus, video_id: &str, with_playback: bool) {
        let asset_id = format!("asset-{}", video_id);
        let meta = VideoMeta {
            video_id: video_id.to_string(),
            asset_id: asset_id.clone(),
            title: format!("Video {}", video_id),
            description: String::new(),
            topics: Vec::new(),
            chapters: Vec::new(),
        };
        corpus.upsert_video(&meta, None).await.unwrap();
        if with_playback {
            corpus
                .set_playback_ids(&asset_id, &[format!("pb-{}", video_id)])
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_rank_scores_by_best_chunk() {
        // One strong chunk beats several mediocre ones
        let hits = vec![
            hit("steady", 0.5),
            hit("steady", 0.5),
            hit("steady", 0.5),
            hit("spiky", 0.9),
            hit("spiky", 0.1),
        ];

        let ranked = rank_video_ids(&hits);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0], ("spiky".to_string(), 0.9));
        assert_eq!(ranked[1], ("steady".to_string(), 0.5));
    }

    #[test]
    fn test_rank_ties_break_on_video_id() {
        let hits = vec![hit("zeta", 0.7), hit("alpha", 0.7), hit("mid", 0.7)];

        let ranked = rank_video_ids(&hits);
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_aggregate_returns_top_k() {
        let corpus = Arc::new(MemoryCorpus::new());
        for id in ["v1", "v2", "v3"] {
            seed_video(&corpus, id, true).await;
        }

        let hits = vec![hit("v1", 0.9), hit("v2", 0.8), hit("v3", 0.7)];
        let aggregator = Aggregator::new(corpus).with_top_k(2);
        let candidates = aggregator.aggregate(&hits).await.unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].video_id, "v1");
        assert_eq!(candidates[0].playback_id, "pb-v1");
        assert_eq!(candidates[0].top_similarity, 0.9);
        assert_eq!(candidates[1].video_id, "v2");
    }

    #[tokio::test]
    async fn test_aggregate_fewer_videos_than_k() {
        let corpus = Arc::new(MemoryCorpus::new());
        seed_video(&corpus, "v1", true).await;

        let aggregator = Aggregator::new(corpus).with_top_k(10);
        let candidates = aggregator.aggregate(&[hit("v1", 0.5)]).await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_drops_unplayable_before_cut() {
        let corpus = Arc::new(MemoryCorpus::new());
        seed_video(&corpus, "best-but-unplayable", false).await;
        seed_video(&corpus, "playable", true).await;

        let hits = vec![hit("best-but-unplayable", 0.9), hit("playable", 0.5)];
        let aggregator = Aggregator::new(corpus).with_top_k(1);
        let candidates = aggregator.aggregate(&hits).await.unwrap();

        // The unplayable video does not consume the single slot
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].video_id, "playable");
    }

    #[tokio::test]
    async fn test_aggregate_skips_unknown_videos() {
        let corpus = Arc::new(MemoryCorpus::new());
        seed_video(&corpus, "known", true).await;

        let hits = vec![hit("ghost", 0.9), hit("known", 0.4)];
        let aggregator = Aggregator::new(corpus);
        let candidates = aggregator.aggregate(&hits).await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].video_id, "known");
    }

    #[tokio::test]
    async fn test_aggregate_empty_hits() {
        let corpus = Arc::new(MemoryCorpus::new());
        let aggregator = Aggregator::new(corpus);
        assert!(aggregator.aggregate(&[]).await.unwrap().is_empty());
    }
}
