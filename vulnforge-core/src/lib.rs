//! VulnForge×Robin Core - Canonical leak model and pure pipeline stages
//!
//! This crate provides the foundational primitives:
//! - Canonical leak records with content-hash dedup identity
//! - Payload normalization (free text, JSON objects, lists)
//! - AEAD envelope for at-rest encryption of raw snippets
//! - Priority scoring (confidence × impact × timeliness)
//! - Shared pipeline counters

pub mod crypto;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod scoring;

pub use crypto::*;
pub use metrics::*;
pub use model::*;
pub use normalize::*;
pub use scoring::*;

/// Provenance label assigned when a payload names no source
pub const DEFAULT_SOURCE: &str = "robin";

/// Confidence assigned to records extracted from free text
pub const TEXT_CONFIDENCE: f64 = 0.6;

/// Confidence assigned to records mapped from JSON objects
pub const JSON_CONFIDENCE: f64 = 0.5;
