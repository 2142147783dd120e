//! Shared pipeline counters
//!
//! Best-effort, lock-free counters shared by the ingest coordinator, the
//! worker pool, and the metrics endpoint. Rendered in Prometheus text
//! exposition format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;

/// Pipeline counters. Construct once in the entrypoint and share via `Arc`.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Items ingested, labeled by source
    ingested: DashMap<String, AtomicU64>,
    /// Records whose enrichment pass completed
    processed: AtomicU64,
    /// Approximate ingested-but-not-yet-enriched count
    backlog: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_ingested(&self, source: &str) {
        self.ingested
            .entry(source.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backlog_inc(&self) {
        self.backlog.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backlog_dec(&self) {
        self.backlog.fetch_sub(1, Ordering::Relaxed);
    }

    /// Seed the backlog gauge from the queue's persisted depth at startup.
    pub fn set_backlog(&self, depth: i64) {
        self.backlog.store(depth, Ordering::Relaxed);
    }

    pub fn processed_total(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn ingested_total(&self) -> u64 {
        self.ingested
            .iter()
            .map(|entry| entry.value().load(Ordering::Relaxed))
            .sum()
    }

    pub fn backlog(&self) -> i64 {
        self.backlog.load(Ordering::Relaxed)
    }

    /// Render the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP vulnforge_ingested_total Items ingested, by source\n");
        out.push_str("# TYPE vulnforge_ingested_total counter\n");
        let mut sources: Vec<(String, u64)> = self
            .ingested
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        sources.sort();
        for (source, count) in sources {
            let _ = writeln!(
                out,
                "vulnforge_ingested_total{{source=\"{}\"}} {}",
                source.replace('\\', "\\\\").replace('"', "\\\""),
                count
            );
        }

        out.push_str("# HELP vulnforge_processed_total Records enriched\n");
        out.push_str("# TYPE vulnforge_processed_total counter\n");
        let _ = writeln!(out, "vulnforge_processed_total {}", self.processed_total());

        out.push_str("# HELP vulnforge_enrich_backlog Ingested but not yet enriched\n");
        out.push_str("# TYPE vulnforge_enrich_backlog gauge\n");
        let _ = writeln!(out, "vulnforge_enrich_backlog {}", self.backlog());

        out
    }
}
