//! VulnForge×Robin Store - durable leak records and the enrichment queue
//!
//! SQLite-backed persistence with the pipeline's storage invariants enforced
//! at this layer:
//! - exactly one `leak_items` row per dedup `hash_key` (unique index,
//!   insert-or-update upsert)
//! - append-only `action_logs` audit trail, foreign-keyed to its record
//! - a durable `enrich_queue` that survives restarts, with atomic
//!   lease-based claims (at-least-once delivery)

pub mod queue;
pub mod store;

pub use queue::*;
pub use store::*;

use thiserror::Error;

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no item with id {0}")]
    NotFound(String),
}
