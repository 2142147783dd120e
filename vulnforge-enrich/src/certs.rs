//! Certificate transparency lookup via crt.sh
//!
//! No credential required; enabled by an explicit flag since crt.sh is a
//! shared community service.

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::traits::{Lookup, LookupError};

const CRTSH_API: &str = "https://crt.sh/";

/// How many distinct certificate names to carry into the enrichment map
const MAX_NAMES: usize = 10;

pub struct CertClient {
    http: Client,
}

impl CertClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct CrtEntry {
    #[serde(default)]
    name_value: String,
    #[serde(default)]
    not_before: Option<String>,
}

#[async_trait]
impl Lookup for CertClient {
    fn name(&self) -> &'static str {
        "crtsh"
    }

    async fn lookup(&self, target: &str) -> Result<Value, LookupError> {
        let response = self
            .http
            .get(CRTSH_API)
            .query(&[("q", target), ("output", "json")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LookupError::Status(response.status()));
        }

        let entries: Vec<CrtEntry> = response.json().await?;

        let mut names: BTreeSet<String> = BTreeSet::new();
        for entry in &entries {
            for name in entry.name_value.lines() {
                names.insert(name.trim().to_string());
            }
        }
        let latest = entries
            .iter()
            .filter_map(|e| e.not_before.as_deref())
            .max()
            .map(str::to_string);

        Ok(json!({
            "enabled": true,
            "certificates": entries.len(),
            "names": names.into_iter().take(MAX_NAMES).collect::<Vec<_>>(),
            "latest_not_before": latest,
        }))
    }
}
