//! Directory watcher: filesystem producer for drop-folder feeds
//!
//! Polls a directory, ingests whole-file payloads, and renames successes
//! with a `.processed` suffix. A file that fails ingestion is logged and
//! left in place for the next poll - at-least-once delivery, which the
//! downstream `hash_key` dedup makes safe.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::coordinator::IngestCoordinator;

/// Suffix marking a file as already ingested
const PROCESSED_SUFFIX: &str = "processed";

pub struct DirectoryWatcher {
    dir: PathBuf,
    poll_interval: Duration,
    source: String,
    coordinator: Arc<IngestCoordinator>,
}

impl DirectoryWatcher {
    pub fn new(
        dir: PathBuf,
        poll_interval: Duration,
        source: impl Into<String>,
        coordinator: Arc<IngestCoordinator>,
    ) -> Self {
        Self {
            dir,
            poll_interval,
            source: source.into(),
            coordinator,
        }
    }

    /// Poll forever. Errors reading the directory are logged and retried on
    /// the next tick.
    pub async fn run(&self) {
        info!(
            "watching {} every {:?} (source {})",
            self.dir.display(),
            self.poll_interval,
            self.source
        );
        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                warn!("poll of {} failed: {}", self.dir.display(), e);
            }
        }
    }

    /// One poll pass over the directory. Returns how many files were
    /// ingested and marked processed.
    pub async fn poll_once(&self) -> std::io::Result<usize> {
        let mut processed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if path
                .extension()
                .map(|ext| ext == PROCESSED_SUFFIX)
                .unwrap_or(false)
            {
                continue;
            }

            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("reading {} failed: {}", path.display(), e);
                    continue;
                }
            };

            // Structured payloads parse as JSON; everything else is treated
            // as a free-text report.
            let payload = match serde_json::from_str::<Value>(&text) {
                Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
                _ => Value::String(text),
            };

            match self.coordinator.ingest(&payload, &self.source).await {
                Ok(ids) => {
                    let mut renamed = path.clone().into_os_string();
                    renamed.push(".");
                    renamed.push(PROCESSED_SUFFIX);
                    if let Err(e) = tokio::fs::rename(&path, &renamed).await {
                        // Next poll will re-ingest; dedup absorbs the replay
                        warn!("marking {} processed failed: {}", path.display(), e);
                    } else {
                        debug!("ingested {} ({} records)", path.display(), ids.len());
                        processed += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        "ingest of {} failed: {}; leaving in place for retry",
                        path.display(),
                        e
                    );
                }
            }
        }

        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use vulnforge_core::{Envelope, Metrics};
    use vulnforge_store::{EnrichQueue, ItemFilter, LeakStore};

    async fn watcher_fixture(dir: &TempDir) -> (DirectoryWatcher, LeakStore) {
        let store = LeakStore::connect(&dir.path().join("watch.sqlite"))
            .await
            .unwrap();
        let queue = EnrichQueue::new(store.pool().clone());
        let coordinator = Arc::new(IngestCoordinator::new(
            store.clone(),
            queue,
            Arc::new(Envelope::from_key(&[5u8; 32]).unwrap()),
            Arc::new(Metrics::new()),
        ));
        let watcher = DirectoryWatcher::new(
            dir.path().join("inbox"),
            Duration::from_millis(50),
            "watcher",
            coordinator,
        );
        (watcher, store)
    }

    #[tokio::test]
    async fn test_poll_ingests_and_renames() {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();

        let json_file = inbox.join("drop.json");
        std::fs::write(
            &json_file,
            json!({"target": {"value": "example.com"}, "leak_type": "credentials", "raw": "x"})
                .to_string(),
        )
        .unwrap();

        let text_file = inbox.join("report.md");
        std::fs::write(&text_file, "Target: other.example\nLeak Type: token\n").unwrap();

        let (watcher, store) = watcher_fixture(&dir).await;
        let processed = watcher.poll_once().await.unwrap();
        assert_eq!(processed, 2);

        assert!(!json_file.exists());
        assert!(inbox.join("drop.json.processed").exists());
        assert!(inbox.join("report.md.processed").exists());

        let (total, _) = store
            .list(&ItemFilter {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);

        // Second poll sees only .processed files and does nothing
        assert_eq!(watcher.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_file_left_in_place() {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();

        let file = inbox.join("drop.json");
        std::fs::write(
            &file,
            json!({"target": {"value": "example.com"}, "raw": "x"}).to_string(),
        )
        .unwrap();

        let (watcher, store) = watcher_fixture(&dir).await;

        // With storage down, ingestion fails and the file stays for retry
        store.pool().close().await;
        assert_eq!(watcher.poll_once().await.unwrap(), 0);
        assert!(file.exists());
        assert!(!inbox.join("drop.json.processed").exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (watcher, _store) = watcher_fixture(&dir).await;
        // inbox/ was never created
        assert!(watcher.poll_once().await.is_err());
    }
}
