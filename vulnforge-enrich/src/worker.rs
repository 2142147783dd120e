//! Enrichment worker pool
//!
//! Workers pull record ids from the durable queue, fan out to the configured
//! collaborators concurrently, merge the results, recompute the priority
//! score, and write everything back in one transaction. Partial enrichment
//! is success: a record is never failed by its lookups.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use vulnforge_core::{compute_score_with, LeakRecord, Metrics, ScoreWeights};
use vulnforge_store::{EnrichQueue, LeakStore, StoreError};

use crate::traits::LookupSet;

/// Default claim lease; a worker that dies mid-job loses the claim after
/// this long and the job is redelivered.
const DEFAULT_LEASE: Duration = Duration::from_secs(300);

/// Idle sleep between polls when the queue is drained
const DEFAULT_POLL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct EnrichmentWorker {
    store: LeakStore,
    queue: EnrichQueue,
    lookups: Arc<LookupSet>,
    metrics: Arc<Metrics>,
    weights: ScoreWeights,
    lease: Duration,
    poll_interval: Duration,
}

impl EnrichmentWorker {
    pub fn new(
        store: LeakStore,
        queue: EnrichQueue,
        lookups: Arc<LookupSet>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            queue,
            lookups,
            metrics,
            weights: ScoreWeights::default(),
            lease: DEFAULT_LEASE,
            poll_interval: DEFAULT_POLL,
        }
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Spawn `size` workers sharing this configuration. The returned handles
    /// run until the process exits.
    pub fn spawn_pool(self, size: usize) -> Vec<tokio::task::JoinHandle<()>> {
        (0..size)
            .map(|i| {
                let worker = self.clone();
                let id = format!("worker-{}", i);
                tokio::spawn(async move { worker.run(id).await })
            })
            .collect()
    }

    pub async fn run(&self, worker_id: String) {
        info!("enrichment worker {} started", worker_id);
        loop {
            match self.run_once(&worker_id).await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    warn!("worker {}: queue error: {}; backing off", worker_id, e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Claim and process at most one job. Returns whether a job was handled.
    pub async fn run_once(&self, worker_id: &str) -> Result<bool, StoreError> {
        let Some(job) = self.queue.claim(worker_id, self.lease).await? else {
            return Ok(false);
        };

        if self.process_item(&job.item_id).await {
            self.queue.ack(job.id).await?;
            self.metrics.backlog_dec();
        }
        // A job that could not complete keeps its lease and is redelivered
        // once it expires.
        Ok(true)
    }

    /// Enrich one record. Returns `true` when the job is finished (including
    /// the record having vanished) and `false` when the write failed and the
    /// job should be redelivered.
    pub async fn process_item(&self, item_id: &str) -> bool {
        let record = match self.store.get(item_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                // Raced with a deletion or a bogus id: nothing to do
                debug!("item {} not found; skipping enrichment", item_id);
                return true;
            }
            Err(e) => {
                warn!("loading {} for enrichment failed: {}", item_id, e);
                return false;
            }
        };

        let enrichment = self.gather(&record).await;
        let score = compute_score_with(
            &self.weights,
            record.confidence,
            &record.structured_fields,
            record.first_seen,
            record.last_seen,
        );

        match self.store.apply_enrichment(&record.id, &enrichment, score).await {
            Ok(()) => {
                self.metrics.count_processed();
                debug!("enriched {} (score {})", record.id, score);
                true
            }
            Err(StoreError::NotFound(_)) => true,
            Err(e) => {
                warn!("writing enrichment for {} failed: {}", record.id, e);
                false
            }
        }
    }

    /// Fan out to all four collaborators concurrently; every lookup completes
    /// (or exhausts its retries) before anything is written.
    async fn gather(&self, record: &LeakRecord) -> Map<String, Value> {
        let email = record
            .structured_fields
            .get("email")
            .and_then(Value::as_str);
        let target = record.target.value.as_str();

        let (breach, shodan, certs, urlscan) = tokio::join!(
            self.lookups.breach(email),
            self.lookups.shodan(target),
            self.lookups.certs(target),
            self.lookups.urlscan(target),
        );

        let mut enrichment = record.enrichment.clone();
        enrichment.insert("breach_db".to_string(), breach);
        enrichment.insert("shodan".to_string(), shodan);
        enrichment.insert("crtsh".to_string(), certs);
        enrichment.insert("urlscan".to_string(), urlscan);
        enrichment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use vulnforge_core::{
        hash_key, CanonicalItem, Sealed, Target, TargetType,
    };
    use crate::traits::{Lookup, LookupError};

    async fn pipeline() -> (TempDir, LeakStore, EnrichQueue, Arc<Metrics>) {
        let dir = TempDir::new().unwrap();
        let store = LeakStore::connect(&dir.path().join("worker.sqlite"))
            .await
            .unwrap();
        let queue = EnrichQueue::new(store.pool().clone());
        (dir, store, queue, Arc::new(Metrics::new()))
    }

    fn stored_item() -> CanonicalItem {
        CanonicalItem {
            target: Target::new(TargetType::Domain, "example.com"),
            leak_type: "credentials".to_string(),
            source: "unit-test".to_string(),
            first_seen: vulnforge_core::parse_timestamp("2024-08-01"),
            last_seen: vulnforge_core::parse_timestamp("2024-08-03"),
            structured_fields: json!({"email": "demo@example.com", "password_present": true})
                .as_object()
                .unwrap()
                .clone(),
            confidence: 0.9,
            tags: vec![],
            notes: None,
            raw: "user:demo@example.com pass:Secret".to_string(),
        }
    }

    fn sealed() -> Sealed {
        Sealed {
            ciphertext: vec![1],
            nonce: vec![0; 12],
            tag: vec![0; 16],
        }
    }

    #[tokio::test]
    async fn test_enrichment_never_fails_the_job() {
        let (_dir, store, queue, metrics) = pipeline().await;
        let item = stored_item();
        let key = hash_key(&item.target.value, &item.leak_type, item.raw.as_bytes());
        let outcome = store.upsert_item(&item, &sealed(), &key).await.unwrap();

        let worker = EnrichmentWorker::new(
            store.clone(),
            queue,
            Arc::new(LookupSet::disabled()),
            metrics.clone(),
        );

        assert!(worker.process_item(&outcome.id).await);

        let record = store.get(&outcome.id).await.unwrap().unwrap();
        for name in ["breach_db", "shodan", "crtsh", "urlscan"] {
            assert_eq!(record.enrichment[name], json!({"enabled": false}));
        }
        // 0.9*50 + 0.9*30 + 1.0*20 = 92
        assert_eq!(record.score, 92);
        assert_eq!(metrics.processed_total(), 1);
    }

    struct AlwaysDown;

    #[async_trait]
    impl Lookup for AlwaysDown {
        fn name(&self) -> &'static str {
            "down"
        }

        async fn lookup(&self, _key: &str) -> Result<serde_json::Value, LookupError> {
            Err(LookupError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE))
        }
    }

    #[tokio::test]
    async fn test_failing_lookup_degrades_to_error_field() {
        let (_dir, store, queue, metrics) = pipeline().await;
        let item = stored_item();
        let key = hash_key(&item.target.value, &item.leak_type, item.raw.as_bytes());
        let outcome = store.upsert_item(&item, &sealed(), &key).await.unwrap();

        let lookups = LookupSet::from_parts(
            None,
            Some(Box::new(AlwaysDown)),
            None,
            None,
            2,
            Duration::from_millis(1),
        );
        let worker =
            EnrichmentWorker::new(store.clone(), queue, Arc::new(lookups), metrics.clone());

        assert!(worker.process_item(&outcome.id).await);

        let record = store.get(&outcome.id).await.unwrap().unwrap();
        assert!(record.enrichment["shodan"]["error"]
            .as_str()
            .unwrap()
            .contains("503"));
        assert_eq!(record.enrichment["breach_db"], json!({"enabled": false}));
        assert_eq!(metrics.processed_total(), 1);
    }

    #[tokio::test]
    async fn test_missing_record_is_finished_quietly() {
        let (_dir, store, queue, metrics) = pipeline().await;
        let worker = EnrichmentWorker::new(
            store,
            queue,
            Arc::new(LookupSet::disabled()),
            metrics.clone(),
        );

        assert!(worker.process_item("no-such-id").await);
        assert_eq!(metrics.processed_total(), 0);
    }

    #[tokio::test]
    async fn test_run_once_drains_queue() {
        let (_dir, store, queue, metrics) = pipeline().await;
        let item = stored_item();
        let key = hash_key(&item.target.value, &item.leak_type, item.raw.as_bytes());
        let outcome = store.upsert_item(&item, &sealed(), &key).await.unwrap();
        queue.enqueue(&outcome.id).await.unwrap();
        metrics.backlog_inc();

        let worker = EnrichmentWorker::new(
            store.clone(),
            queue.clone(),
            Arc::new(LookupSet::disabled()),
            metrics.clone(),
        );

        assert!(worker.run_once("worker-0").await.unwrap());
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert_eq!(metrics.backlog(), 0);
        assert!(!worker.run_once("worker-0").await.unwrap());

        let record = store.get(&outcome.id).await.unwrap().unwrap();
        assert!(!record.enrichment.is_empty());
    }
}
