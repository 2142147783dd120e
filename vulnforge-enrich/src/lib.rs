//! VulnForge×Robin Enrichment - external OSINT lookups and the worker pool
//!
//! Asynchronous augmentation of stored leak records:
//! - **Breach DB**: known-breach check keyed on an email-shaped field
//! - **Shodan**: exposed-host search keyed on the target value
//! - **crt.sh**: certificate transparency history for the target
//! - **urlscan.io**: recent scan sightings of the target
//!
//! Each collaborator is independently optional; a lookup that fails after
//! retries degrades to an error field instead of failing the record.

pub mod breach;
pub mod certs;
pub mod retry;
pub mod shodan;
pub mod traits;
pub mod urlscan;
pub mod worker;

pub use breach::*;
pub use certs::*;
pub use retry::*;
pub use shodan::*;
pub use traits::*;
pub use urlscan::*;
pub use worker::*;
