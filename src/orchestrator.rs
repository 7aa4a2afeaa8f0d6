//! Search pipeline orchestrator for Klipp.
//!
//! Runs one search as a sequence of checkpointed stages: retrieve and
//! aggregate, publish the provisional video list, then fan out one
//! extraction worker per candidate. Results are delivered via side effects
//! on the channel and the job store; by the time extraction finishes the
//! submitting caller has long since returned.
//!
//! Stage results are recorded in the checkpoint store before the next stage
//! starts, so a re-invoked run (crash, retry) replays recorded values
//! instead of redoing the work. The fan-out dispatch itself is not
//! checkpointed: re-dispatching a video is wasteful but safe, because
//! workers are stateless per video and subscribers merge idempotently.

use crate::channel::{ChannelBroker, ErrorPayload, SearchEvent, SearchStatus, VideosPayload};
use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::config::{Prompts, Settings};
use crate::corpus::SqliteCorpus;
use crate::embedding::OpenAIEmbedder;
use crate::error::{KlippError, Result};
use crate::extraction::{Clip, ExtractionWorker, OpenAIClipModel};
use crate::job_store::{JobProgress, JobState, JobStore, MemoryJobStore};
use crate::ranking::{Aggregator, VideoCandidate, VideoSearchResult};
use crate::retrieval::RetrievalClient;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const STEP_RETRIEVE_AGGREGATE: &str = "retrieve-and-aggregate";
const STEP_PUBLISH_PROVISIONAL: &str = "publish-provisional";

const TOTAL_STEPS: u32 = 3;

/// A submitted search.
///
/// The id is pre-generated by the caller so a channel subscription can be
/// established before any result exists. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub search_id: Uuid,
    pub query: String,
}

impl SearchRequest {
    /// Create a request with a fresh search id.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            search_id: Uuid::new_v4(),
            query: query.into(),
        }
    }

    /// Create a request for a caller-provided search id.
    pub fn with_id(search_id: Uuid, query: impl Into<String>) -> Self {
        Self {
            search_id,
            query: query.into(),
        }
    }
}

/// The main orchestrator for the Klipp search pipeline.
pub struct Orchestrator {
    settings: Settings,
    retrieval: RetrievalClient,
    aggregator: Aggregator,
    worker: Arc<ExtractionWorker>,
    broker: Arc<ChannelBroker>,
    jobs: Arc<dyn JobStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    batch_size: usize,
}

impl Orchestrator {
    /// Create an orchestrator with default (OpenAI + SQLite) components.
    pub fn new(settings: Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let corpus = Arc::new(SqliteCorpus::new(&settings.sqlite_path())?);

        let embedder = Arc::new(OpenAIEmbedder::with_config(
            &settings.embedding.model,
            settings.embedding.dimensions as usize,
        ));

        let retrieval = RetrievalClient::new(embedder, corpus.clone())
            .with_limit(settings.retrieval.chunk_limit);

        let aggregator =
            Aggregator::new(corpus.clone()).with_top_k(settings.retrieval.top_videos);

        let broker = Arc::new(ChannelBroker::with_ttls(
            settings.channel.token_ttl_seconds,
            settings.channel.retention_seconds,
        ));

        let model = Arc::new(OpenAIClipModel::with_model(&settings.extraction.model));
        let worker = Arc::new(
            ExtractionWorker::new(model, corpus, broker.clone())
                .with_prompts(prompts)
                .with_timeout(Duration::from_secs(settings.extraction.timeout_seconds))
                .with_retry(
                    settings.extraction.max_retries,
                    Duration::from_millis(settings.extraction.retry_backoff_ms),
                ),
        );

        let jobs = Arc::new(MemoryJobStore::with_ttl(settings.job_store.ttl_seconds));
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let batch_size = settings.extraction.batch_size;

        Ok(Self {
            settings,
            retrieval,
            aggregator,
            worker,
            broker,
            jobs,
            checkpoints,
            batch_size,
        })
    }

    /// Create an orchestrator with custom components.
    #[allow(clippy::too_many_arguments)]
    pub fn with_components(
        settings: Settings,
        retrieval: RetrievalClient,
        aggregator: Aggregator,
        worker: Arc<ExtractionWorker>,
        broker: Arc<ChannelBroker>,
        jobs: Arc<dyn JobStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let batch_size = settings.extraction.batch_size;
        Self {
            settings,
            retrieval,
            aggregator,
            worker,
            broker,
            jobs,
            checkpoints,
            batch_size,
        }
    }

    /// Get the channel broker.
    pub fn broker(&self) -> Arc<ChannelBroker> {
        self.broker.clone()
    }

    /// Get the job store.
    pub fn jobs(&self) -> Arc<dyn JobStore> {
        self.jobs.clone()
    }

    /// Get the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one search.
    ///
    /// Returns once extraction has been dispatched; clip results arrive on
    /// the search channel as workers finish. A search with zero candidates
    /// is a successful completion, not an error. Re-invoking with the same
    /// search id resumes from the last checkpointed stage.
    #[instrument(skip(self, request), fields(search_id = %request.search_id))]
    pub async fn run(&self, request: SearchRequest) -> Result<()> {
        if request.query.trim().is_empty() {
            return Err(KlippError::InvalidInput(
                "Search query must not be blank".to_string(),
            ));
        }

        let search_id = request.search_id;
        self.jobs.set(search_id, JobState::processing()).await?;

        // Stage 1: retrieve and aggregate. An upstream failure here is
        // fatal to the whole search since no candidates can exist
        let candidates = match self.retrieve_and_aggregate(&request).await {
            Ok(candidates) => candidates,
            Err(e) => {
                let message = e.to_string();
                warn!("Search failed at retrieval: {}", message);
                self.broker.publish(
                    search_id,
                    SearchEvent::Error(ErrorPayload {
                        video_id: None,
                        message: message.clone(),
                    }),
                )?;
                self.jobs.set(search_id, JobState::failed(message)).await?;
                return Err(e);
            }
        };

        // Stage 2: publish the provisional list before any worker starts,
        // so subscribers always see videos before clips
        self.publish_provisional(search_id, &candidates).await?;

        if candidates.is_empty() {
            info!("Search completed with no candidates");
            self.jobs
                .set(search_id, JobState::completed(Vec::new()))
                .await?;
            return Ok(());
        }

        // Stage 3: fan out extraction and return. Completion is observed
        // through the channel, not through this call
        self.jobs
            .update_progress(
                search_id,
                JobProgress {
                    step: 3,
                    total_steps: TOTAL_STEPS,
                    current_step: "Extracting clips".to_string(),
                },
            )
            .await?;

        info!("Dispatching extraction for {} videos", candidates.len());
        self.dispatch_extraction(search_id, request.query, candidates);
        Ok(())
    }

    async fn retrieve_and_aggregate(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<VideoCandidate>> {
        let search_id = request.search_id;

        if let Some(value) = self.checkpoints.load(search_id, STEP_RETRIEVE_AGGREGATE).await? {
            debug!("Replaying recorded candidates");
            return Ok(serde_json::from_value(value)?);
        }

        self.jobs
            .update_progress(
                search_id,
                JobProgress {
                    step: 1,
                    total_steps: TOTAL_STEPS,
                    current_step: "Searching the corpus".to_string(),
                },
            )
            .await?;
        let hits = self.retrieval.search(&request.query).await?;

        self.jobs
            .update_progress(
                search_id,
                JobProgress {
                    step: 2,
                    total_steps: TOTAL_STEPS,
                    current_step: "Ranking candidate videos".to_string(),
                },
            )
            .await?;
        let candidates = self.aggregator.aggregate(&hits).await?;

        self.checkpoints
            .record(
                search_id,
                STEP_RETRIEVE_AGGREGATE,
                serde_json::to_value(&candidates)?,
            )
            .await?;
        Ok(candidates)
    }

    async fn publish_provisional(
        &self,
        search_id: Uuid,
        candidates: &[VideoCandidate],
    ) -> Result<()> {
        // Republishing would be harmless (subscribers do a full replace),
        // but the checkpoint keeps replay behavior explicit
        if self
            .checkpoints
            .load(search_id, STEP_PUBLISH_PROVISIONAL)
            .await?
            .is_some()
        {
            debug!("Provisional videos already published, skipping");
            return Ok(());
        }

        let status = if candidates.is_empty() {
            SearchStatus::Completed
        } else {
            SearchStatus::Initial
        };
        let videos = candidates
            .iter()
            .cloned()
            .map(VideoSearchResult::provisional)
            .collect();

        self.broker
            .publish(search_id, SearchEvent::Videos(VideosPayload { videos, status }))?;

        self.checkpoints
            .record(search_id, STEP_PUBLISH_PROVISIONAL, serde_json::json!(true))
            .await?;
        Ok(())
    }

    /// Spawn the bounded worker pool and return immediately.
    ///
    /// Each worker publishes its own result; the pool driver only folds
    /// outcomes into the fallback job store once every video has settled.
    fn dispatch_extraction(
        &self,
        search_id: Uuid,
        query: String,
        candidates: Vec<VideoCandidate>,
    ) {
        let worker = self.worker.clone();
        let jobs = self.jobs.clone();
        let batch_size = self.batch_size.max(1);

        tokio::spawn(async move {
            let outcomes: Vec<_> = stream::iter(candidates.clone())
                .map(|video| {
                    let worker = worker.clone();
                    let query = query.clone();
                    async move { worker.extract(search_id, &query, &video).await }
                })
                .buffer_unordered(batch_size)
                .collect()
                .await;

            let mut clips_by_video: HashMap<String, Vec<Clip>> = HashMap::new();
            for outcome in outcomes {
                match outcome {
                    Ok(outcome) => {
                        clips_by_video.insert(outcome.video_id, outcome.clips);
                    }
                    Err(e) => warn!("Extraction worker could not publish: {}", e),
                }
            }

            // Final results keep the candidate ranking order; failed videos
            // simply carry no clips
            let results: Vec<VideoSearchResult> = candidates
                .into_iter()
                .map(|video| {
                    let clips = clips_by_video
                        .remove(&video.video_id)
                        .unwrap_or_default();
                    VideoSearchResult { video, clips }
                })
                .collect();

            if let Err(e) = jobs.set(search_id, JobState::completed(results)).await {
                warn!("Failed to store final results for {}: {}", search_id, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{SearchEvent, Subscription};
    use crate::corpus::{ChunkIndex, ChunkRecord, MemoryCorpus, VideoCatalog, VideoMeta};
    use crate::embedding::Embedder;
    use crate::extraction::{ClipExtraction, ClipModel, Relevance};
    use crate::job_store::JobStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SAMPLE_VTT: &str =
        "WEBVTT\n\n00:00:00.000 --> 00:01:00.000\nCodecs compress video.\n\n00:01:00.000 --> 00:03:00.000\nH264 and AV1 compared in depth.\n";

    /// Embedder returning a fixed vector, counting calls.
    struct StubEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    /// Embedder that always fails, for the fatal-retrieval path.
    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(KlippError::Embedding("model unavailable".to_string()))
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    /// Clip model returning one fixed clip, failing for listed video ids.
    ///
    /// The failing set is matched against the prompt text, which embeds the
    /// video title.
    struct StubClipModel {
        fail_for_title: Option<String>,
    }

    #[async_trait]
    impl ClipModel for StubClipModel {
        async fn extract_clips(&self, _system: &str, user: &str) -> Result<ClipExtraction> {
            if let Some(title) = &self.fail_for_title {
                if user.contains(title.as_str()) {
                    return Err(KlippError::OpenAI("boom".to_string()));
                }
            }
            Ok(ClipExtraction {
                clips: vec![Clip {
                    start_time_seconds: 60.0,
                    end_time_seconds: 110.0,
                    snippet: "Covers the query directly".to_string(),
                    relevance: Relevance::Exact,
                }],
            })
        }
    }

    async fn seed_corpus(corpus: &Arc<MemoryCorpus>, video_ids: &[&str]) {
        for (i, video_id) in video_ids.iter().enumerate() {
            let asset_id = format!("asset-{}", video_id);
            let meta = VideoMeta {
                video_id: video_id.to_string(),
                asset_id: asset_id.clone(),
                title: format!("Video {}", video_id),
                description: String::new(),
                topics: Vec::new(),
                chapters: Vec::new(),
            };
            corpus.upsert_video(&meta, Some(SAMPLE_VTT)).await.unwrap();
            corpus
                .set_playback_ids(&asset_id, &[format!("pb-{}", video_id)])
                .await
                .unwrap();

            // Distinct embeddings so similarity ranking is deterministic
            let embedding = vec![1.0, 0.1 * i as f32];
            corpus
                .upsert_chunks(&[ChunkRecord::new(
                    video_id.to_string(),
                    asset_id.clone(),
                    0,
                    "codecs compress video".to_string(),
                    0.0,
                    180.0,
                    embedding,
                )])
                .await
                .unwrap();
        }
    }

    fn build_orchestrator(
        corpus: Arc<MemoryCorpus>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ClipModel>,
    ) -> Orchestrator {
        let settings = Settings::default();
        let broker = Arc::new(ChannelBroker::new());
        let retrieval = RetrievalClient::new(embedder, corpus.clone());
        let aggregator = Aggregator::new(corpus.clone());
        let worker = Arc::new(
            ExtractionWorker::new(model, corpus, broker.clone())
                .with_retry(0, Duration::ZERO),
        );
        Orchestrator::with_components(
            settings,
            retrieval,
            aggregator,
            worker,
            broker,
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryCheckpointStore::new()),
        )
    }

    /// Drain the subscription until the view of one search is complete.
    async fn collect_until_complete(sub: &mut Subscription) -> crate::merge::SearchView {
        let mut view = crate::merge::SearchView::new();
        loop {
            let envelope = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .expect("timed out waiting for channel events")
                .expect("channel closed before completion");
            view.apply(&envelope.event);
            if view.is_complete() {
                return view;
            }
        }
    }

    #[tokio::test]
    async fn test_end_to_end_four_videos() {
        let corpus = Arc::new(MemoryCorpus::new());
        seed_corpus(&corpus, &["v1", "v2", "v3", "v4"]).await;

        let orchestrator = build_orchestrator(
            corpus,
            Arc::new(StubEmbedder {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(StubClipModel {
                fail_for_title: None,
            }),
        );

        let request = SearchRequest::new("video codecs");
        let search_id = request.search_id;
        let broker = orchestrator.broker();
        let token = broker.issue_token(search_id);
        let mut sub = broker.subscribe(&token).unwrap();

        orchestrator.run(request).await.unwrap();

        let view = collect_until_complete(&mut sub).await;
        assert_eq!(view.results().len(), 4);
        for result in view.results() {
            assert_eq!(result.clips.len(), 1);
            assert!(result.clips[0].end_time_seconds > result.clips[0].start_time_seconds);
        }
        assert!(view.errors().is_empty());

        // Sorted by descending similarity
        let scores: Vec<f32> = view
            .results()
            .iter()
            .map(|r| r.video.top_similarity)
            .collect();
        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[tokio::test]
    async fn test_videos_published_before_any_clips() {
        let corpus = Arc::new(MemoryCorpus::new());
        seed_corpus(&corpus, &["v1", "v2"]).await;

        let orchestrator = build_orchestrator(
            corpus,
            Arc::new(StubEmbedder {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(StubClipModel {
                fail_for_title: None,
            }),
        );

        let request = SearchRequest::new("codecs");
        let search_id = request.search_id;
        let broker = orchestrator.broker();
        let token = broker.issue_token(search_id);
        let mut sub = broker.subscribe(&token).unwrap();

        orchestrator.run(request).await.unwrap();

        // First event on the channel must be the provisional list
        let first = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        match first.event {
            SearchEvent::Videos(p) => {
                assert_eq!(p.videos.len(), 2);
                assert_eq!(p.status, SearchStatus::Initial);
                assert!(p.videos.iter().all(|v| v.clips.is_empty()));
            }
            other => panic!("Expected videos first, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_match_completes_without_workers() {
        let corpus = Arc::new(MemoryCorpus::new());
        // Corpus left empty: nothing can match

        let embedder = Arc::new(StubEmbedder {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = build_orchestrator(
            corpus,
            embedder,
            Arc::new(StubClipModel {
                fail_for_title: None,
            }),
        );

        let request = SearchRequest::new("zzzqqqnonsense");
        let search_id = request.search_id;
        let broker = orchestrator.broker();
        let token = broker.issue_token(search_id);
        let mut sub = broker.subscribe(&token).unwrap();

        orchestrator.run(request).await.unwrap();

        let envelope = sub.try_recv().unwrap();
        match envelope.event {
            SearchEvent::Videos(p) => {
                assert!(p.videos.is_empty());
                assert_eq!(p.status, SearchStatus::Completed);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        // Single message, no workers dispatched
        assert!(sub.try_recv().is_none());

        let state = orchestrator.jobs().get(search_id).await.unwrap().unwrap();
        assert_eq!(state.status, JobStatus::Completed);
        assert!(state.results.is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_video_does_not_abort_siblings() {
        let corpus = Arc::new(MemoryCorpus::new());
        seed_corpus(&corpus, &["vx", "vy", "vz"]).await;

        let orchestrator = build_orchestrator(
            corpus,
            Arc::new(StubEmbedder {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(StubClipModel {
                fail_for_title: Some("Video vx".to_string()),
            }),
        );

        let request = SearchRequest::new("codecs");
        let search_id = request.search_id;
        let broker = orchestrator.broker();
        let token = broker.issue_token(search_id);
        let mut sub = broker.subscribe(&token).unwrap();

        orchestrator.run(request).await.unwrap();

        let view = collect_until_complete(&mut sub).await;
        assert_eq!(view.results().len(), 3);

        let by_id: HashMap<&str, usize> = view
            .results()
            .iter()
            .map(|r| (r.video.video_id.as_str(), r.clips.len()))
            .collect();
        assert_eq!(by_id["vx"], 0);
        assert_eq!(by_id["vy"], 1);
        assert_eq!(by_id["vz"], 1);

        // Exactly one error message, scoped to the failing video
        assert_eq!(view.errors().len(), 1);
        assert_eq!(view.errors()[0].video_id.as_deref(), Some("vx"));
        assert!(!view.search_failed());
    }

    #[tokio::test]
    async fn test_retrieval_failure_fails_the_search() {
        let corpus = Arc::new(MemoryCorpus::new());
        seed_corpus(&corpus, &["v1"]).await;

        let orchestrator = build_orchestrator(
            corpus,
            Arc::new(FailingEmbedder),
            Arc::new(StubClipModel {
                fail_for_title: None,
            }),
        );

        let request = SearchRequest::new("codecs");
        let search_id = request.search_id;
        let broker = orchestrator.broker();
        let token = broker.issue_token(search_id);
        let mut sub = broker.subscribe(&token).unwrap();

        let result = orchestrator.run(request).await;
        assert!(result.is_err());

        let envelope = sub.try_recv().unwrap();
        match envelope.event {
            SearchEvent::Error(p) => {
                assert!(p.video_id.is_none());
                assert!(p.message.contains("model unavailable"));
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        let state = orchestrator.jobs().get(search_id).await.unwrap().unwrap();
        assert_eq!(state.status, JobStatus::Failed);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_blank_query_rejected_without_job() {
        let corpus = Arc::new(MemoryCorpus::new());
        let embedder = Arc::new(StubEmbedder {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = build_orchestrator(
            corpus,
            embedder.clone(),
            Arc::new(StubClipModel {
                fail_for_title: None,
            }),
        );

        let request = SearchRequest::new("   ");
        let search_id = request.search_id;
        let result = orchestrator.run(request).await;

        assert!(matches!(result, Err(KlippError::InvalidInput(_))));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert!(orchestrator.jobs().get(search_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replayed_run_skips_completed_stages() {
        let corpus = Arc::new(MemoryCorpus::new());
        seed_corpus(&corpus, &["v1", "v2"]).await;

        let embedder = Arc::new(StubEmbedder {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = build_orchestrator(
            corpus,
            embedder.clone(),
            Arc::new(StubClipModel {
                fail_for_title: None,
            }),
        );

        let request = SearchRequest::new("codecs");
        let search_id = request.search_id;
        let broker = orchestrator.broker();
        let token = broker.issue_token(search_id);
        let mut sub = broker.subscribe(&token).unwrap();

        orchestrator.run(request.clone()).await.unwrap();
        collect_until_complete(&mut sub).await;
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        // Simulated retry of the same search: retrieval replays from the
        // checkpoint and the provisional publish is skipped
        orchestrator.run(request).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        let mut view = crate::merge::SearchView::new();
        let resumed_token = broker.issue_token(search_id);
        let mut replay_sub = broker.subscribe(&resumed_token).unwrap();
        let mut videos_messages = 0;
        while let Some(envelope) = replay_sub.try_recv() {
            if matches!(envelope.event, SearchEvent::Videos(_)) {
                videos_messages += 1;
            }
            view.apply(&envelope.event);
        }
        assert_eq!(videos_messages, 1);

        // Re-dispatched workers republish clips; the merge absorbs the
        // duplicates without growing the result list
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !view.is_complete() && tokio::time::Instant::now() < deadline {
            if let Some(envelope) =
                tokio::time::timeout(Duration::from_millis(200), replay_sub.recv())
                    .await
                    .ok()
                    .flatten()
            {
                view.apply(&envelope.event);
            }
        }
        assert_eq!(view.results().len(), 2);
    }
}
