//! VulnForge×Robin API - HTTP surface for ingest and review
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Ingest a payload, returns affected record ids |
//! | `GET`  | `/items` | Filtered, paginated listing |
//! | `GET`  | `/items/{id}` | Point lookup with audit trail |
//! | `POST` | `/items/{id}/actions` | Append a review action |
//! | `POST` | `/items/{id}/decrypt` | Credential-gated snippet decryption |
//! | `GET`  | `/healthz` | Storage and queue reachability |
//! | `GET`  | `/metrics` | Prometheus text exposition |
//! | `GET`  | `/` | Review dashboard |
//!
//! Error responses are `{"error": {"code": ..., "message": ...}}`. Client
//! problems are 4xx; degraded states (health, partial enrichment) stay 2xx.

pub mod error;
pub mod server;

pub use error::*;
pub use server::*;
