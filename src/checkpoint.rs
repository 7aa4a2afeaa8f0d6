//! Durable step checkpoints for resumable search runs.
//!
//! The orchestrator records each stage's result before the next stage
//! starts. A re-invoked run loads the recorded value instead of redoing the
//! work, which keeps externally visible effects safe under retry.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Default retention for step records (10 minutes).
///
/// Retries of a search happen within this window; records older than the
/// TTL are evicted so a long-running process does not retain every search
/// it ever ran.
pub const DEFAULT_CHECKPOINT_TTL_SECONDS: i64 = 600;

/// Trait for checkpoint storage.
///
/// Values are stored as JSON so heterogeneous step results share one store.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the recorded result for a step, if the step already ran.
    async fn load(&self, search_id: Uuid, step: &str) -> Result<Option<Value>>;

    /// Record a step's result. Overwrites any previous record for the step.
    async fn record(&self, search_id: Uuid, step: &str, value: Value) -> Result<()>;

    /// Drop all checkpoints for a search.
    async fn clear(&self, search_id: Uuid) -> Result<()>;
}

/// In-memory checkpoint store with TTL expiry.
///
/// Durable only for the process lifetime; the trait is the seam for a
/// persistent backend. Stale records read as absent, and each write sweeps
/// expired entries.
pub struct MemoryCheckpointStore {
    records: RwLock<HashMap<(Uuid, String), TimestampedValue>>,
    ttl: Duration,
}

struct TimestampedValue {
    value: Value,
    written_at: DateTime<Utc>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CHECKPOINT_TTL_SECONDS)
    }

    pub fn with_ttl(ttl_seconds: i64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    fn is_fresh(&self, entry: &TimestampedValue) -> bool {
        Utc::now() - entry.written_at < self.ttl
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, search_id: Uuid, step: &str) -> Result<Option<Value>> {
        let records = self.records.read().unwrap();
        Ok(records
            .get(&(search_id, step.to_string()))
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.value.clone()))
    }

    async fn record(&self, search_id: Uuid, step: &str, value: Value) -> Result<()> {
        let mut records = self.records.write().unwrap();

        // Sweep on write so abandoned searches cannot accumulate
        let now = Utc::now();
        records.retain(|_, entry| now - entry.written_at < self.ttl);

        records.insert(
            (search_id, step.to_string()),
            TimestampedValue {
                value,
                written_at: now,
            },
        );
        Ok(())
    }

    async fn clear(&self, search_id: Uuid) -> Result<()> {
        let mut records = self.records.write().unwrap();
        records.retain(|(id, _), _| *id != search_id);
        Ok(())
    }
}
