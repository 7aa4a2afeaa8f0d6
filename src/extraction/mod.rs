//! Per-video clip extraction.
//!
//! The fan-out stage of a search: each worker takes one candidate video,
//! asks a language model for 1-3 justified clips, and performs exactly one
//! publish on the search channel ("clips" on success, "error" on failure).
//! A worker's failure never reaches its siblings.

mod openai;

pub use openai::OpenAIClipModel;

use crate::channel::{ChannelBroker, ClipsPayload, ErrorPayload, SearchEvent};
use crate::config::Prompts;
use crate::corpus::VideoCatalog;
use crate::error::{KlippError, Result};
use crate::ranking::VideoCandidate;
use crate::vtt::{self, VttCue, VttParser};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Hard cap on clips per video.
pub const MAX_CLIPS_PER_VIDEO: usize = 3;

/// Default per-attempt deadline for a generation call.
pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default retry count after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default base backoff between attempts, doubled each retry.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// How directly a clip addresses the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    /// Directly on-topic.
    Exact,
    /// Covers an adjacent concept.
    Related,
}

/// A timestamped sub-clip with its justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub start_time_seconds: f64,
    pub end_time_seconds: f64,
    /// Human-readable explanation of why the clip is relevant.
    pub snippet: String,
    pub relevance: Relevance,
}

/// Raw model output for one video, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipExtraction {
    pub clips: Vec<Clip>,
}

/// Trait for structured clip generation.
#[async_trait]
pub trait ClipModel: Send + Sync {
    /// Generate clip candidates for one rendered prompt pair.
    async fn extract_clips(&self, system_prompt: &str, user_prompt: &str)
        -> Result<ClipExtraction>;
}

/// Outcome of one worker run, folded into the fallback job state.
///
/// `clips` is empty when the video had no transcript or its extraction
/// failed; `error` distinguishes the two.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub video_id: String,
    pub clips: Vec<Clip>,
    pub error: Option<String>,
}

/// Extracts clips for one candidate video and publishes the result.
pub struct ExtractionWorker {
    model: Arc<dyn ClipModel>,
    catalog: Arc<dyn VideoCatalog>,
    broker: Arc<ChannelBroker>,
    prompts: Prompts,
    parser: VttParser,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl ExtractionWorker {
    /// Create a worker with default prompts, timeout, and retry policy.
    pub fn new(
        model: Arc<dyn ClipModel>,
        catalog: Arc<dyn VideoCatalog>,
        broker: Arc<ChannelBroker>,
    ) -> Self {
        Self {
            model,
            catalog,
            broker,
            prompts: Prompts::default(),
            parser: VttParser::new(),
            timeout: DEFAULT_EXTRACTION_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Set custom prompts (with user-defined variables).
    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = prompts;
        self
    }

    /// Set the per-attempt generation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry count and base backoff between attempts.
    pub fn with_retry(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Run extraction for one candidate video.
    ///
    /// Exactly one publish happens per run: "clips" on success (including
    /// the empty fast-path for videos without a transcript), "error" when
    /// generation fails after retries. Per-video failures are absorbed into
    /// the outcome; only a channel publish failure propagates as `Err`.
    #[instrument(skip(self, query, video), fields(video_id = %video.video_id))]
    pub async fn extract(
        &self,
        search_id: Uuid,
        query: &str,
        video: &VideoCandidate,
    ) -> Result<ExtractionOutcome> {
        let transcript = match self.catalog.transcript_vtt(&video.video_id).await {
            Ok(vtt) => vtt,
            Err(e) => {
                return self
                    .publish_error(search_id, &video.video_id, format!("Transcript lookup failed: {}", e))
                    .await;
            }
        };

        let cues = transcript
            .as_deref()
            .map(|vtt| self.parser.parse(vtt))
            .unwrap_or_default();

        // No transcript (or nothing timestamped in it): nothing to ground a
        // clip on, so skip the model entirely and publish an empty list
        if cues.is_empty() {
            debug!("No usable transcript, publishing empty clip list");
            return self.publish_clips(search_id, &video.video_id, Vec::new());
        }

        let duration = vtt::transcript_duration(&cues);
        let (system, user) = self.build_prompt(query, video, &cues);

        match self.extract_with_retry(&system, &user, duration).await {
            Ok(clips) => self.publish_clips(search_id, &video.video_id, clips),
            Err(e) => {
                warn!("Clip extraction failed for {}: {}", video.video_id, e);
                self.publish_error(search_id, &video.video_id, e.to_string())
                    .await
            }
        }
    }

    /// Call the model with a per-attempt deadline, retrying with doubling
    /// backoff on timeout, API failure, or malformed output.
    async fn extract_with_retry(
        &self,
        system: &str,
        user: &str,
        duration: f64,
    ) -> Result<Vec<Clip>> {
        let attempts = self.max_retries + 1;
        let mut backoff = self.retry_backoff;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result =
                match tokio::time::timeout(self.timeout, self.model.extract_clips(system, user))
                    .await
                {
                    Ok(Ok(extraction)) => validate_clips(extraction, duration),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(KlippError::Extraction(format!(
                        "Generation timed out after {:.0}s",
                        self.timeout.as_secs_f64()
                    ))),
                };

            match result {
                Ok(clips) => return Ok(clips),
                Err(e) => {
                    warn!("Extraction attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                    if attempt < attempts && !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| KlippError::Extraction("No extraction attempts made".to_string())))
    }

    fn build_prompt(&self, query: &str, video: &VideoCandidate, cues: &[VttCue]) -> (String, String) {
        let chapters = if video.chapters.is_empty() {
            "(none)".to_string()
        } else {
            video
                .chapters
                .iter()
                .map(|c| format!("{} {}", c.start, c.title))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut vars = HashMap::new();
        vars.insert("query".to_string(), query.to_string());
        vars.insert("title".to_string(), video.title.clone());
        vars.insert("description".to_string(), video.description.clone());
        vars.insert("topics".to_string(), video.topics.join(", "));
        vars.insert("chapters".to_string(), chapters);
        vars.insert(
            "transcript".to_string(),
            vtt::format_cues_for_prompt(cues),
        );

        let system = self
            .prompts
            .render_with_custom(&self.prompts.extraction.system, &vars);
        let user = self
            .prompts
            .render_with_custom(&self.prompts.extraction.user, &vars);
        (system, user)
    }

    fn publish_clips(
        &self,
        search_id: Uuid,
        video_id: &str,
        clips: Vec<Clip>,
    ) -> Result<ExtractionOutcome> {
        self.broker.publish(
            search_id,
            SearchEvent::Clips(ClipsPayload {
                video_id: video_id.to_string(),
                clips: clips.clone(),
            }),
        )?;
        Ok(ExtractionOutcome {
            video_id: video_id.to_string(),
            clips,
            error: None,
        })
    }

    async fn publish_error(
        &self,
        search_id: Uuid,
        video_id: &str,
        message: String,
    ) -> Result<ExtractionOutcome> {
        self.broker.publish(
            search_id,
            SearchEvent::Error(ErrorPayload {
                video_id: Some(video_id.to_string()),
                message: message.clone(),
            }),
        )?;
        Ok(ExtractionOutcome {
            video_id: video_id.to_string(),
            clips: Vec::new(),
            error: Some(message),
        })
    }
}

/// Validate and clamp model output into deliverable clips.
///
/// The strict contract (1-3 clips, non-empty snippet) rejects the whole
/// response as malformed so the retry path behaves deterministically.
/// Time ranges are clamped defensively to the transcript duration; a clip
/// left degenerate after clamping is dropped, and a response with zero
/// surviving clips counts as malformed.
pub fn validate_clips(extraction: ClipExtraction, duration_bound: f64) -> Result<Vec<Clip>> {
    let count = extraction.clips.len();
    if count == 0 {
        return Err(KlippError::Extraction(
            "Model returned no clips for a video with a transcript".to_string(),
        ));
    }
    if count > MAX_CLIPS_PER_VIDEO {
        return Err(KlippError::Extraction(format!(
            "Model returned {} clips, at most {} allowed",
            count, MAX_CLIPS_PER_VIDEO
        )));
    }

    let mut clips = Vec::new();
    for mut clip in extraction.clips {
        if clip.snippet.trim().is_empty() {
            return Err(KlippError::Extraction(
                "Clip is missing its justification snippet".to_string(),
            ));
        }

        if duration_bound > 0.0 {
            if clip.start_time_seconds >= duration_bound {
                warn!(
                    "Dropping clip starting at {:.1}s, past transcript end {:.1}s",
                    clip.start_time_seconds, duration_bound
                );
                continue;
            }
            clip.end_time_seconds = clip.end_time_seconds.min(duration_bound);
        }

        if clip.start_time_seconds < 0.0 || clip.end_time_seconds <= clip.start_time_seconds {
            warn!(
                "Dropping degenerate clip {:.1}s - {:.1}s",
                clip.start_time_seconds, clip.end_time_seconds
            );
            continue;
        }

        clips.push(clip);
    }

    if clips.is_empty() {
        return Err(KlippError::Extraction(
            "No clips survived time-range validation".to_string(),
        ));
    }
    Ok(clips)
}
