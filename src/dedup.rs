use crate::types::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Persistent set of previously-seen external ids. Checked before any
/// downstream processing so duplicate items never reach the generator.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn has_seen(&self, external_id: &str) -> Result<bool>;

    /// Idempotent, atomic per item: two concurrent callers marking the
    /// same id must not both observe it as new.
    async fn mark_seen(&self, external_id: &str, source_id: &str) -> Result<()>;

    /// Retention: drop entries seen before the cutoff. Returns the number
    /// of entries removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Postgres-backed store over the `seen_items` table.
pub struct PgDedupStore {
    pool: PgPool,
}

impl PgDedupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DedupStore for PgDedupStore {
    async fn has_seen(&self, external_id: &str) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT external_id FROM seen_items WHERE external_id = $1")
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn mark_seen(&self, external_id: &str, source_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO seen_items (external_id, source_id, seen_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(external_id)
        .bind(source_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM seen_items WHERE seen_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        let pruned = result.rows_affected();
        if pruned > 0 {
            debug!("Pruned {} dedup entries older than {}", pruned, cutoff);
        }
        Ok(pruned)
    }
}

/// In-memory store for tests and local development. `set_available(false)`
/// simulates the store being unreachable, which the orchestrator treats as
/// a cycle-level failure.
pub struct MemoryDedupStore {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
    available: AtomicBool,
}

impl Default for MemoryDedupStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seen.lock().await.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PipelineError::Cycle("dedup store unavailable".to_string()))
        }
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn has_seen(&self, external_id: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.seen.lock().await.contains_key(external_id))
    }

    async fn mark_seen(&self, external_id: &str, _source_id: &str) -> Result<()> {
        self.check_available()?;
        self.seen
            .lock()
            .await
            .entry(external_id.to_string())
            .or_insert_with(Utc::now);
        Ok(())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_available()?;
        let mut seen = self.seen.lock().await;
        let before = seen.len();
        seen.retain(|_, seen_at| *seen_at >= cutoff);
        Ok((before - seen.len()) as u64)
    }
}
