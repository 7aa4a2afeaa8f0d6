//! In-memory pub/sub broker for search channels.
//!
//! Channels are keyed by search id, so concurrent searches never contend.
//! The broker serializes concurrent publishes from extraction workers into
//! per-topic append-only logs; the channel lock is synchronous and never
//! held across an await.
//!
//! Single-instance only: the broker is the seam where a multi-instance
//! deployment would plug in a real message bus.

use super::{Envelope, SearchEvent, SubscribeToken, Topic};
use crate::error::{KlippError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default idle retention for channel backlogs (10 minutes).
pub const DEFAULT_CHANNEL_RETENTION_SECONDS: i64 = 600;

struct SubscriberHandle {
    topics: Vec<Topic>,
    sender: mpsc::UnboundedSender<Envelope>,
}

struct ChannelState {
    logs: HashMap<Topic, Vec<Envelope>>,
    subscribers: Vec<SubscriberHandle>,
    last_activity: DateTime<Utc>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            logs: HashMap::new(),
            subscribers: Vec::new(),
            last_activity: Utc::now(),
        }
    }
}

/// Broker managing all live search channels.
pub struct ChannelBroker {
    channels: Mutex<HashMap<Uuid, ChannelState>>,
    token_ttl: Duration,
    retention: Duration,
}

impl ChannelBroker {
    /// Create a broker with default token and retention lifetimes.
    pub fn new() -> Self {
        Self::with_ttls(
            super::DEFAULT_TOKEN_TTL_SECONDS,
            DEFAULT_CHANNEL_RETENTION_SECONDS,
        )
    }

    /// Create a broker with custom lifetimes in seconds.
    pub fn with_ttls(token_ttl_seconds: i64, retention_seconds: i64) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            token_ttl: Duration::seconds(token_ttl_seconds),
            retention: Duration::seconds(retention_seconds),
        }
    }

    /// Append an event to its topic log and fan it out to live subscribers.
    ///
    /// Returns the event's per-topic sequence number. Publishing never
    /// blocks on slow subscribers; a dropped receiver is pruned here.
    pub fn publish(&self, search_id: Uuid, event: SearchEvent) -> Result<u64> {
        let topic = event.topic();
        let mut channels = self.lock_channels()?;
        let state = channels
            .entry(search_id)
            .or_insert_with(ChannelState::new);

        let log = state.logs.entry(topic).or_default();
        let seq = log.len() as u64 + 1;
        let envelope = Envelope { seq, event };
        log.push(envelope.clone());
        state.last_activity = Utc::now();

        state.subscribers.retain(|sub| !sub.sender.is_closed());
        for sub in &state.subscribers {
            if sub.topics.contains(&topic) {
                // Receiver may have just closed; nothing to do about it
                let _ = sub.sender.send(envelope.clone());
            }
        }

        debug!("Published {} #{} on search:{}", topic, seq, search_id);
        Ok(seq)
    }

    /// Issue a token scoped to one search channel and all its topics.
    pub fn issue_token(&self, search_id: Uuid) -> SubscribeToken {
        SubscribeToken::issue(search_id, self.token_ttl)
    }

    /// Issue a token limited to an explicit topic set.
    pub fn issue_scoped_token(&self, search_id: Uuid, topics: Vec<Topic>) -> SubscribeToken {
        SubscribeToken::issue_scoped(search_id, topics, self.token_ttl)
    }

    /// Re-issue an expired or expiring token with the same scope.
    pub fn refresh_token(&self, token: &SubscribeToken) -> SubscribeToken {
        SubscribeToken::issue_scoped(token.search_id, token.topics.clone(), self.token_ttl)
    }

    /// Subscribe from the beginning of every topic the token covers.
    ///
    /// The full backlog is replayed first, then live events follow.
    pub fn subscribe(&self, token: &SubscribeToken) -> Result<Subscription> {
        self.resume(token, &HashMap::new())
    }

    /// Subscribe, replaying only events past the given per-topic offsets.
    ///
    /// Used after a token refresh: the subscriber passes the last sequence
    /// number it saw per topic and continues without gaps. Delivery stays
    /// at-least-once; duplicates around the boundary are possible.
    pub fn resume(
        &self,
        token: &SubscribeToken,
        offsets: &HashMap<Topic, u64>,
    ) -> Result<Subscription> {
        if token.is_expired() {
            return Err(KlippError::Channel(
                "Subscription token has expired".to_string(),
            ));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let mut channels = self.lock_channels()?;
        let state = channels
            .entry(token.search_id)
            .or_insert_with(ChannelState::new);

        for topic in Topic::ALL {
            if !token.covers(topic) {
                continue;
            }
            let after = offsets.get(&topic).copied().unwrap_or(0);
            if let Some(log) = state.logs.get(&topic) {
                for envelope in log.iter().filter(|e| e.seq > after) {
                    let _ = sender.send(envelope.clone());
                }
            }
        }

        state.subscribers.push(SubscriberHandle {
            topics: token.topics.clone(),
            sender,
        });

        Ok(Subscription { receiver })
    }

    /// Spawn a background task sweeping idle channels at a fixed interval.
    ///
    /// Long-running servers must run one of these; without it, finished
    /// search backlogs accumulate for the life of the process.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep_idle() {
                    Ok(0) => {}
                    Ok(swept) => debug!("Swept {} idle channels", swept),
                    Err(e) => warn!("Channel sweep failed: {}", e),
                }
            }
        })
    }

    /// Drop channels idle past the retention window.
    pub fn sweep_idle(&self) -> Result<usize> {
        let mut channels = self.lock_channels()?;
        let now = Utc::now();
        let before = channels.len();
        channels.retain(|_, state| now - state.last_activity < self.retention);
        Ok(before - channels.len())
    }

    /// Number of live channels.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn lock_channels(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, ChannelState>>> {
        self.channels
            .lock()
            .map_err(|e| KlippError::Channel(format!("Failed to acquire broker lock: {}", e)))
    }
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription to one search channel.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` when the channel is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Take the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }
}
