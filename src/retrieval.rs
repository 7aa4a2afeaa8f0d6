//! Vector retrieval over the transcript chunk corpus.
//!
//! First stage of a search: embed the query and pull back the closest
//! chunks. Recall-oriented by design; relevance judgement happens later,
//! against full transcripts.

use crate::corpus::{ChunkHit, ChunkIndex, NO_SIMILARITY_THRESHOLD};
use crate::embedding::Embedder;
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Default number of chunks fetched per query.
pub const DEFAULT_RETRIEVAL_LIMIT: usize = 150;

/// Embeds queries and fetches the closest transcript chunks.
pub struct RetrievalClient {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn ChunkIndex>,
    limit: usize,
}

impl RetrievalClient {
    /// Create a retrieval client with the default chunk limit.
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn ChunkIndex>) -> Self {
        Self {
            embedder,
            index,
            limit: DEFAULT_RETRIEVAL_LIMIT,
        }
    }

    /// Set the maximum number of chunks fetched per query.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Fetch the chunks closest to the query, ordered by similarity.
    ///
    /// A blank query returns no hits without touching the embedder: there
    /// is nothing meaningful to embed. No similarity floor is applied, so
    /// a sparse corpus still yields candidates.
    #[instrument(skip(self, query))]
    pub async fn search(&self, query: &str) -> Result<Vec<ChunkHit>> {
        if query.trim().is_empty() {
            debug!("Blank query, skipping retrieval");
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;

        let hits = self
            .index
            .similarity_search(&query_embedding, self.limit, NO_SIMILARITY_THRESHOLD)
            .await?;

        info!("Retrieved {} chunks for query", hits.len());
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{ChunkRecord, MemoryCorpus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embedder that counts calls and returns a fixed vector.
    struct CountingEmbedder {
        calls: AtomicUsize,
        vector: Vec<f32>,
    }

    impl CountingEmbedder {
        fn new(vector: Vec<f32>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                vector,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector.clone())
        }

        fn dimensions(&self) -> usize {
            self.vector.len()
        }
    }

    #[tokio::test]
    async fn test_blank_query_never_embeds() {
        let embedder = Arc::new(CountingEmbedder::new(vec![1.0, 0.0]));
        let corpus = Arc::new(MemoryCorpus::new());
        let client = RetrievalClient::new(embedder.clone(), corpus);

        for query in ["", "   ", "\t\n"] {
            let hits = client.search(query).await.unwrap();
            assert!(hits.is_empty());
        }

        assert_eq!(embedder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_search_embeds_once_and_respects_limit() {
        let embedder = Arc::new(CountingEmbedder::new(vec![1.0, 0.0]));
        let corpus = Arc::new(MemoryCorpus::new());

        let chunks: Vec<ChunkRecord> = (0..5)
            .map(|i| {
                ChunkRecord::new(
                    format!("v{}", i),
                    format!("asset-{}", i),
                    0,
                    format!("chunk {}", i),
                    0.0,
                    30.0,
                    vec![1.0, i as f32 * 0.1],
                )
            })
            .collect();
        corpus.upsert_chunks(&chunks).await.unwrap();

        let client = RetrievalClient::new(embedder.clone(), corpus).with_limit(3);
        let hits = client.search("webrtc basics").await.unwrap();

        assert_eq!(hits.len(), 3);
        assert_eq!(embedder.call_count(), 1);
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[tokio::test]
    async fn test_search_keeps_low_scoring_hits() {
        // No similarity floor: even anti-correlated chunks come back
        let embedder = Arc::new(CountingEmbedder::new(vec![1.0, 0.0]));
        let corpus = Arc::new(MemoryCorpus::new());
        corpus
            .upsert_chunks(&[ChunkRecord::new(
                "v1".to_string(),
                "asset-1".to_string(),
                0,
                "unrelated".to_string(),
                0.0,
                30.0,
                vec![-1.0, 0.0],
            )])
            .await
            .unwrap();

        let client = RetrievalClient::new(embedder, corpus);
        let hits = client.search("anything").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].similarity < 0.0);
    }
}
