//! Fallback job state store for polling clients.
//!
//! Clients that cannot hold a live channel subscription poll job state by
//! search id instead. Entries expire after a fixed TTL to bound memory, so
//! absence after completion is expected and must be read as "unknown",
//! never as "failed".

use crate::error::Result;
use crate::ranking::VideoSearchResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Default retention for job entries (10 minutes).
pub const DEFAULT_JOB_TTL_SECONDS: i64 = 600;

/// Lifecycle state of a search job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

/// Step-by-step progress for a running search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub step: u32,
    pub total_steps: u32,
    pub current_step: String,
}

/// Mirrored search state for polling clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    #[serde(default)]
    pub results: Vec<VideoSearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobState {
    /// A freshly started job.
    pub fn processing() -> Self {
        Self {
            status: JobStatus::Processing,
            results: Vec::new(),
            progress: None,
            error: None,
        }
    }

    /// A finished job with its final results.
    pub fn completed(results: Vec<VideoSearchResult>) -> Self {
        Self {
            status: JobStatus::Completed,
            results,
            progress: None,
            error: None,
        }
    }

    /// A job that failed before producing results.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            results: Vec::new(),
            progress: None,
            error: Some(message.into()),
        }
    }
}

/// Trait for job state stores.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store or replace the state for a search.
    async fn set(&self, search_id: Uuid, state: JobState) -> Result<()>;

    /// Fetch the state for a search, if it is still retained.
    async fn get(&self, search_id: Uuid) -> Result<Option<JobState>>;

    /// Update progress without touching status or results.
    ///
    /// Creates a processing entry if none exists yet.
    async fn update_progress(&self, search_id: Uuid, progress: JobProgress) -> Result<()>;

    /// Remove the state for a search.
    async fn delete(&self, search_id: Uuid) -> Result<()>;
}

/// In-memory job store with TTL expiry.
///
/// Single-instance only: a multi-instance deployment needs a shared backend
/// (cache or database) behind the same trait.
pub struct MemoryJobStore {
    entries: RwLock<HashMap<Uuid, TimestampedState>>,
    ttl: Duration,
}

struct TimestampedState {
    state: JobState,
    written_at: DateTime<Utc>,
}

impl MemoryJobStore {
    /// Create a store with the default 10-minute TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_JOB_TTL_SECONDS)
    }

    /// Create a store with a custom TTL in seconds.
    pub fn with_ttl(ttl_seconds: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    fn is_fresh(&self, entry: &TimestampedState) -> bool {
        Utc::now() - entry.written_at < self.ttl
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn set(&self, search_id: Uuid, state: JobState) -> Result<()> {
        let mut entries = self.entries.write().unwrap();

        // Sweep on write so abandoned entries cannot accumulate
        let now = Utc::now();
        entries.retain(|_, entry| now - entry.written_at < self.ttl);

        entries.insert(
            search_id,
            TimestampedState {
                state,
                written_at: now,
            },
        );
        Ok(())
    }

    async fn get(&self, search_id: Uuid) -> Result<Option<JobState>> {
        let entries = self.entries.read().unwrap();
        Ok(entries
            .get(&search_id)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.state.clone()))
    }

    async fn update_progress(&self, search_id: Uuid, progress: JobProgress) -> Result<()> {
        let mut entries = self.entries.write().unwrap();

        let state = entries
            .get(&search_id)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.state.clone())
            .unwrap_or_else(JobState::processing);

        entries.insert(
            search_id,
            TimestampedState {
                state: JobState {
                    progress: Some(progress),
                    ..state
                },
                written_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, search_id: Uuid) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.remove(&search_id);
        Ok(())
    }
}
