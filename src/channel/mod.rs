//! Per-search delivery channel.
//!
//! Each search owns a channel named `search:{search_id}` carrying three
//! topics: "videos" for the provisional candidate list, "clips" for
//! per-video extraction results, and "error" for isolated failures.
//! Publishes are append-only and ordered per topic; delivery is
//! at-least-once, so subscribers must merge clip messages idempotently by
//! video id.

mod broker;
mod token;

pub use broker::{ChannelBroker, Subscription, DEFAULT_CHANNEL_RETENTION_SECONDS};
pub use token::{SubscribeToken, DEFAULT_TOKEN_TTL_SECONDS};

use crate::extraction::Clip;
use crate::ranking::VideoSearchResult;
use serde::{Deserialize, Serialize};

/// A message topic within a search channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Videos,
    Clips,
    Error,
}

impl Topic {
    /// All topics a search channel carries.
    pub const ALL: [Topic; 3] = [Topic::Videos, Topic::Clips, Topic::Error];
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Videos => write!(f, "videos"),
            Topic::Clips => write!(f, "clips"),
            Topic::Error => write!(f, "error"),
        }
    }
}

/// Status carried on "videos" messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStatus {
    /// Provisional candidate list, clips still pending.
    #[default]
    Initial,
    /// Candidates known, extraction in flight.
    Processing,
    /// Terminal: no further messages will follow.
    Completed,
}

/// Payload of a "videos" message: the full candidate list.
///
/// Subscribers replace their list wholesale on receipt, which makes
/// republishing the same message on replay harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideosPayload {
    pub videos: Vec<VideoSearchResult>,
    pub status: SearchStatus,
}

/// Payload of a "clips" message: one video's extracted clips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipsPayload {
    pub video_id: String,
    pub clips: Vec<Clip>,
}

/// Payload of an "error" message.
///
/// `video_id` is set for isolated per-video failures and absent for
/// search-level failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    pub message: String,
}

/// An event published on a search channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "lowercase")]
pub enum SearchEvent {
    Videos(VideosPayload),
    Clips(ClipsPayload),
    Error(ErrorPayload),
}

impl SearchEvent {
    /// The topic this event belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            SearchEvent::Videos(_) => Topic::Videos,
            SearchEvent::Clips(_) => Topic::Clips,
            SearchEvent::Error(_) => Topic::Error,
        }
    }
}

/// A published event with its per-topic sequence number.
///
/// Sequence numbers start at 1 and are contiguous within one topic of one
/// channel; there is no ordering relation across topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    #[serde(flatten)]
    pub event: SearchEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_topic_tag() {
        let event = SearchEvent::Clips(ClipsPayload {
            video_id: "v1".to_string(),
            clips: Vec::new(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["topic"], "clips");
        assert_eq!(json["video_id"], "v1");
    }

    #[test]
    fn test_error_payload_omits_absent_video_id() {
        let event = SearchEvent::Error(ErrorPayload {
            video_id: None,
            message: "retrieval failed".to_string(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("video_id").is_none());
        assert_eq!(json["topic"], "error");
    }

    #[test]
    fn test_topic_display() {
        assert_eq!(Topic::Videos.to_string(), "videos");
        assert_eq!(Topic::Clips.to_string(), "clips");
        assert_eq!(Topic::Error.to_string(), "error");
    }
}
