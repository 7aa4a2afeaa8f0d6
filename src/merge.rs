//! Client-side merge of channel messages into one result view.
//!
//! The server publishes stateless events, ordered only within a topic.
//! The view merges by video id: "videos" messages replace the candidate
//! list wholesale, "clips" messages replace one video's clips, and
//! duplicates of either are harmless. This is what makes at-least-once
//! delivery and step replay safe for subscribers.

use crate::channel::{ErrorPayload, SearchEvent, SearchStatus};
use crate::extraction::Clip;
use crate::ranking::VideoSearchResult;
use std::collections::{HashMap, HashSet};

/// Merged state of one search, built from channel events.
#[derive(Debug, Default)]
pub struct SearchView {
    results: Vec<VideoSearchResult>,
    status: SearchStatus,
    /// Latest clips per video, kept so a "videos" replay can re-overlay them.
    clips_by_video: HashMap<String, Vec<Clip>>,
    /// Videos that have produced their clips-or-error message.
    settled: HashSet<String>,
    errors: Vec<ErrorPayload>,
}

impl SearchView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one channel event into the view.
    pub fn apply(&mut self, event: &SearchEvent) {
        match event {
            SearchEvent::Videos(payload) => {
                self.status = payload.status;
                self.results = payload.videos.clone();
                for result in &mut self.results {
                    if let Some(clips) = self.clips_by_video.get(&result.video.video_id) {
                        result.clips = clips.clone();
                    }
                }
            }
            SearchEvent::Clips(payload) => {
                self.clips_by_video
                    .insert(payload.video_id.clone(), payload.clips.clone());
                self.settled.insert(payload.video_id.clone());
                if let Some(result) = self
                    .results
                    .iter_mut()
                    .find(|r| r.video.video_id == payload.video_id)
                {
                    result.clips = payload.clips.clone();
                }
            }
            SearchEvent::Error(payload) => {
                if let Some(video_id) = &payload.video_id {
                    self.settled.insert(video_id.clone());
                }
                self.errors.push(payload.clone());
            }
        }
    }

    /// The merged results, in the order the candidate list was published.
    pub fn results(&self) -> &[VideoSearchResult] {
        &self.results
    }

    pub fn status(&self) -> SearchStatus {
        self.status
    }

    /// Errors received so far, per-video and search-level.
    pub fn errors(&self) -> &[ErrorPayload] {
        &self.errors
    }

    /// Whether a search-level failure (no video id) has been reported.
    pub fn search_failed(&self) -> bool {
        self.errors.iter().any(|e| e.video_id.is_none())
    }

    /// Whether no further messages are expected.
    ///
    /// True once the "videos" message carried a completed status, or once
    /// every listed video has settled with a clips or error message.
    pub fn is_complete(&self) -> bool {
        if self.search_failed() {
            return true;
        }
        match self.status {
            SearchStatus::Completed => true,
            SearchStatus::Initial | SearchStatus::Processing => {
                !self.results.is_empty()
                    && self
                        .results
                        .iter()
                        .all(|r| self.settled.contains(&r.video.video_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ClipsPayload, VideosPayload};
    use crate::extraction::Relevance;
    use crate::ranking::VideoCandidate;

    fn candidate(video_id: &str) -> VideoCandidate {
        VideoCandidate {
            video_id: video_id.to_string(),
            asset_id: format!("asset-{}", video_id),
            title: format!("Video {}", video_id),
            description: String::new(),
            topics: Vec::new(),
            chapters: Vec::new(),
            playback_id: format!("pb-{}", video_id),
            top_similarity: 0.5,
        }
    }

    fn videos_event(ids: &[&str], status: SearchStatus) -> SearchEvent {
        SearchEvent::Videos(VideosPayload {
            videos: ids
                .iter()
                .map(|id| VideoSearchResult::provisional(candidate(id)))
                .collect(),
            status,
        })
    }

    fn clips_event(video_id: &str, snippet: &str) -> SearchEvent {
        SearchEvent::Clips(ClipsPayload {
            video_id: video_id.to_string(),
            clips: vec![Clip {
                start_time_seconds: 10.0,
                end_time_seconds: 55.0,
                snippet: snippet.to_string(),
                relevance: Relevance::Exact,
            }],
        })
    }

    fn error_event(video_id: Option<&str>) -> SearchEvent {
        SearchEvent::Error(ErrorPayload {
            video_id: video_id.map(str::to_string),
            message: "extraction failed".to_string(),
        })
    }

    #[test]
    fn test_videos_replay_is_idempotent() {
        let event = videos_event(&["a", "b"], SearchStatus::Initial);

        let mut once = SearchView::new();
        once.apply(&event);

        let mut twice = SearchView::new();
        twice.apply(&event);
        twice.apply(&event);

        assert_eq!(once.results().len(), twice.results().len());
        assert_eq!(once.status(), twice.status());
        for (a, b) in once.results().iter().zip(twice.results()) {
            assert_eq!(a.video.video_id, b.video.video_id);
            assert_eq!(a.clips, b.clips);
        }
    }

    #[test]
    fn test_duplicate_clips_replace_by_video_id() {
        let mut view = SearchView::new();
        view.apply(&videos_event(&["a", "b"], SearchStatus::Initial));

        // A, then B, then A again (duplicate with newer content)
        view.apply(&clips_event("a", "first"));
        view.apply(&clips_event("b", "b clips"));
        view.apply(&clips_event("a", "latest"));

        assert_eq!(view.results().len(), 2);
        let a = &view.results()[0];
        assert_eq!(a.video.video_id, "a");
        assert_eq!(a.clips.len(), 1);
        assert_eq!(a.clips[0].snippet, "latest");
        assert_eq!(view.results()[1].clips[0].snippet, "b clips");
    }

    #[test]
    fn test_videos_replay_preserves_received_clips() {
        let mut view = SearchView::new();
        view.apply(&videos_event(&["a"], SearchStatus::Initial));
        view.apply(&clips_event("a", "kept"));

        // Orchestrator replay republishes the provisional list
        view.apply(&videos_event(&["a"], SearchStatus::Initial));

        assert_eq!(view.results()[0].clips.len(), 1);
        assert_eq!(view.results()[0].clips[0].snippet, "kept");
        assert!(view.is_complete());
    }

    #[test]
    fn test_completion_requires_every_video_settled() {
        let mut view = SearchView::new();
        view.apply(&videos_event(&["a", "b", "c"], SearchStatus::Initial));
        assert!(!view.is_complete());

        view.apply(&clips_event("a", "a"));
        view.apply(&clips_event("b", "b"));
        assert!(!view.is_complete());

        // An error settles a video too
        view.apply(&error_event(Some("c")));
        assert!(view.is_complete());
        assert_eq!(view.errors().len(), 1);
        assert!(!view.search_failed());
    }

    #[test]
    fn test_empty_completed_videos_message_is_terminal() {
        let mut view = SearchView::new();
        view.apply(&videos_event(&[], SearchStatus::Completed));

        assert!(view.is_complete());
        assert!(view.results().is_empty());
    }

    #[test]
    fn test_search_level_error_is_terminal() {
        let mut view = SearchView::new();
        view.apply(&error_event(None));

        assert!(view.search_failed());
        assert!(view.is_complete());
    }

    #[test]
    fn test_clips_before_videos_still_merge() {
        // No cross-topic ordering guarantee: the clips message can be
        // applied before the provisional list arrives
        let mut view = SearchView::new();
        view.apply(&clips_event("a", "early"));
        view.apply(&videos_event(&["a"], SearchStatus::Initial));

        assert_eq!(view.results()[0].clips[0].snippet, "early");
        assert!(view.is_complete());
    }
}
