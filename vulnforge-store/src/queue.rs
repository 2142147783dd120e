//! Durable enrichment queue
//!
//! A SQLite-backed job queue feeding the worker pool. Jobs survive process
//! restarts; a claim is an atomic lease (`UPDATE ... RETURNING`), so a job is
//! delivered to exactly one worker per attempt, and stale leases from crashed
//! workers become claimable again - at-least-once delivery overall, which the
//! `hash_key` dedup downstream makes safe.

use std::time::Duration;

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::StoreError;

/// A claimed enrichment job
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub item_id: String,
}

#[derive(Clone)]
pub struct EnrichQueue {
    pool: SqlitePool,
}

impl EnrichQueue {
    /// The queue shares the store's pool; its table is part of the same
    /// schema so jobs are as durable as the records they reference.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enqueue a record for enrichment. Callers must only do this after the
    /// record write has committed.
    pub async fn enqueue(&self, item_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO enrich_queue (item_id, enqueued_at) VALUES (?, ?)")
            .bind(item_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomically claim the oldest available job: one that is unclaimed, or
    /// whose lease expired. Returns `None` when the queue is drained.
    pub async fn claim(&self, worker: &str, lease: Duration) -> Result<Option<Job>, StoreError> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let cutoff = now - lease;

        let row = sqlx::query(
            r#"
            UPDATE enrich_queue SET claimed_by = ?, claimed_at = ?
            WHERE id = (
                SELECT id FROM enrich_queue
                WHERE claimed_at IS NULL OR claimed_at < ?
                ORDER BY id
                LIMIT 1
            )
            RETURNING id, item_id
            "#,
        )
        .bind(worker)
        .bind(now)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|r| {
                Ok::<_, sqlx::Error>(Job {
                    id: r.try_get("id")?,
                    item_id: r.try_get("item_id")?,
                })
            })
            .transpose()?)
    }

    /// Acknowledge a finished job, removing it from the queue.
    pub async fn ack(&self, job_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM enrich_queue WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of jobs currently queued (claimed or not).
    pub async fn depth(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS depth FROM enrich_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("depth")?)
    }

    /// Queue reachability probe for the health endpoint.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LeakStore;
    use tempfile::TempDir;

    async fn test_queue() -> (TempDir, EnrichQueue) {
        let dir = TempDir::new().unwrap();
        let store = LeakStore::connect(&dir.path().join("queue.sqlite"))
            .await
            .unwrap();
        (dir, EnrichQueue::new(store.pool().clone()))
    }

    const LEASE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_enqueue_claim_ack() {
        let (_dir, queue) = test_queue().await;

        queue.enqueue("item-1").await.unwrap();
        queue.enqueue("item-2").await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 2);

        let job = queue.claim("worker-0", LEASE).await.unwrap().unwrap();
        assert_eq!(job.item_id, "item-1");

        // Claimed job is invisible to other workers within the lease
        let other = queue.claim("worker-1", LEASE).await.unwrap().unwrap();
        assert_eq!(other.item_id, "item-2");
        assert!(queue.claim("worker-2", LEASE).await.unwrap().is_none());

        queue.ack(job.id).await.unwrap();
        queue.ack(other.id).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_lease_reclaimed() {
        let (_dir, queue) = test_queue().await;
        queue.enqueue("item-1").await.unwrap();

        let job = queue.claim("worker-0", Duration::ZERO).await.unwrap();
        assert!(job.is_some());

        // Zero lease: the claim is immediately stale and redeliverable
        tokio::time::sleep(Duration::from_millis(5)).await;
        let redelivered = queue.claim("worker-1", Duration::ZERO).await.unwrap();
        assert_eq!(redelivered.unwrap().item_id, "item-1");
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_allowed() {
        // Re-ingesting a record re-enqueues it; duplicates are fine because
        // enrichment is idempotent.
        let (_dir, queue) = test_queue().await;
        queue.enqueue("item-1").await.unwrap();
        queue.enqueue("item-1").await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 2);
    }
}
