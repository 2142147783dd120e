//! VulnForge×Robin Ingest - producers feeding the pipeline
//!
//! The coordinator turns arbitrary payloads into deduplicated, encrypted,
//! persisted records and queues each one for enrichment. The directory
//! watcher is a filesystem producer on top of it.

pub mod coordinator;
pub mod watcher;

pub use coordinator::*;
pub use watcher::*;
