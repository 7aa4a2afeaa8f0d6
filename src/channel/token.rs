//! Scoped, expiring subscription credentials.
//!
//! A token grants read access to one search's channel and an explicit set
//! of topics, for a bounded time. Tokens are re-issuable on expiry without
//! losing in-flight messages, since subscribers resume by per-topic
//! sequence offsets.

use super::Topic;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default token lifetime (5 minutes).
pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 300;

/// A channel- and topic-scoped subscription credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeToken {
    /// Opaque token identity.
    pub token: Uuid,
    /// The search channel this token grants access to.
    pub search_id: Uuid,
    /// The topics this token may observe.
    pub topics: Vec<Topic>,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl SubscribeToken {
    /// Issue a token covering all topics of a search channel.
    pub(crate) fn issue(search_id: Uuid, ttl: Duration) -> Self {
        Self::issue_scoped(search_id, Topic::ALL.to_vec(), ttl)
    }

    /// Issue a token covering an explicit topic set.
    pub(crate) fn issue_scoped(search_id: Uuid, topics: Vec<Topic>, ttl: Duration) -> Self {
        Self {
            token: Uuid::new_v4(),
            search_id,
            topics,
            expires_at: Utc::now() + ttl,
        }
    }

    /// Whether the token has passed its expiry.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether the token's scope includes a topic.
    pub fn covers(&self, topic: Topic) -> bool {
        self.topics.contains(&topic)
    }
}
