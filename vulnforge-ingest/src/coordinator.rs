//! Ingest coordinator: normalize, encrypt, dedup, persist, enqueue
//!
//! Each item is written atomically; its id is enqueued for enrichment only
//! after the write commits, so the queue never references an unpersisted
//! record and no persisted record silently misses its turn.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use vulnforge_core::{
    hash_key, normalize, CryptoError, Envelope, Metrics, NormalizeError,
};
use vulnforge_store::{EnrichQueue, LeakStore, StoreError};

/// Errors from an ingest call. Normalization problems are client errors;
/// the rest are storage/crypto failures that must reach the caller - data
/// is never dropped silently.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct IngestCoordinator {
    store: LeakStore,
    queue: EnrichQueue,
    envelope: Arc<Envelope>,
    metrics: Arc<Metrics>,
}

impl IngestCoordinator {
    pub fn new(
        store: LeakStore,
        queue: EnrichQueue,
        envelope: Arc<Envelope>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            queue,
            envelope,
            metrics,
        }
    }

    /// Ingest one payload (text, object, or list). Returns the ids of every
    /// affected record, created or updated.
    pub async fn ingest(
        &self,
        payload: &Value,
        source_label: &str,
    ) -> Result<Vec<String>, IngestError> {
        let items = normalize(payload, source_label)?;
        let mut ids = Vec::with_capacity(items.len());

        for item in items {
            let raw = item.raw.as_bytes();
            let sealed = self.envelope.encrypt(raw, None)?;
            let key = hash_key(&item.target.value, &item.leak_type, raw);

            let outcome = self.store.upsert_item(&item, &sealed, &key).await?;
            self.queue.enqueue(&outcome.id).await?;

            self.metrics.count_ingested(&item.source);
            self.metrics.backlog_inc();

            debug!(
                "{} record {} ({} / {})",
                if outcome.created { "created" } else { "updated" },
                outcome.id,
                item.target.value,
                item.leak_type
            );
            ids.push(outcome.id);
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use vulnforge_store::ItemFilter;

    async fn coordinator() -> (TempDir, IngestCoordinator, LeakStore, EnrichQueue, Arc<Metrics>) {
        let dir = TempDir::new().unwrap();
        let store = LeakStore::connect(&dir.path().join("ingest.sqlite"))
            .await
            .unwrap();
        let queue = EnrichQueue::new(store.pool().clone());
        let metrics = Arc::new(Metrics::new());
        let envelope = Arc::new(Envelope::from_key(&[3u8; 32]).unwrap());
        let coordinator = IngestCoordinator::new(
            store.clone(),
            queue.clone(),
            envelope,
            metrics.clone(),
        );
        (dir, coordinator, store, queue, metrics)
    }

    #[tokio::test]
    async fn test_ingest_persists_encrypts_and_enqueues() {
        let (_dir, coordinator, store, queue, metrics) = coordinator().await;
        let payload = json!({
            "target": {"type": "domain", "value": "example.com"},
            "leak_type": "credentials",
            "source": "unit-test",
            "raw": "user:demo@example.com pass:Secret",
        });

        let ids = coordinator.ingest(&payload, "robin").await.unwrap();
        assert_eq!(ids.len(), 1);

        let record = store.get(&ids[0]).await.unwrap().unwrap();
        assert!(!record.raw_ciphertext.is_empty());
        assert_ne!(record.raw_ciphertext, b"user:demo@example.com pass:Secret");
        assert_eq!(record.raw_nonce.len(), 12);
        assert_eq!(record.raw_tag.len(), 16);

        assert_eq!(queue.depth().await.unwrap(), 1);
        assert_eq!(metrics.ingested_total(), 1);
        assert_eq!(metrics.backlog(), 1);
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent_but_reenqueues() {
        let (_dir, coordinator, store, queue, _metrics) = coordinator().await;
        let payload = json!({
            "target": {"value": "Example.COM"},
            "leak_type": "Credentials",
            "raw": "user:demo",
        });
        let equivalent = json!({
            "target": {"value": "example.com"},
            "leak_type": "credentials",
            "raw": "user:demo",
        });

        let first = coordinator.ingest(&payload, "robin").await.unwrap();
        let second = coordinator.ingest(&equivalent, "robin").await.unwrap();
        assert_eq!(first, second);

        let (total, _) = store
            .list(&ItemFilter {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        // Both ingests enqueue: the record gets re-enriched after an update
        assert_eq!(queue.depth().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_payload_isolates_bad_elements() {
        let (_dir, coordinator, store, _queue, _metrics) = coordinator().await;
        let payload = json!([
            {"target": {"value": "one.example"}, "leak_type": "credentials", "raw": "a"},
            false,
            {"target": {"value": "three.example"}, "leak_type": "token", "raw": "b"},
        ]);

        let ids = coordinator.ingest(&payload, "robin").await.unwrap();
        assert_eq!(ids.len(), 2);

        let (total, _) = store
            .list(&ItemFilter {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_unsupported_payload_rejected() {
        let (_dir, coordinator, _store, queue, metrics) = coordinator().await;
        let err = coordinator.ingest(&json!(12.5), "robin").await.unwrap_err();
        assert!(matches!(err, IngestError::Normalize(_)));
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert_eq!(metrics.ingested_total(), 0);
    }

    #[tokio::test]
    async fn test_metrics_labeled_by_source() {
        let (_dir, coordinator, _store, _queue, metrics) = coordinator().await;
        coordinator
            .ingest(&json!({"source": "feed-a", "raw": "x"}), "robin")
            .await
            .unwrap();
        coordinator
            .ingest(&json!({"raw": "y"}), "watcher")
            .await
            .unwrap();

        let text = metrics.render();
        assert!(text.contains("vulnforge_ingested_total{source=\"feed-a\"} 1"));
        assert!(text.contains("vulnforge_ingested_total{source=\"watcher\"} 1"));
    }
}
