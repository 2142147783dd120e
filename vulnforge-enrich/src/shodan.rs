//! Shodan host search keyed on the target value

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::traits::{Lookup, LookupError};

const SHODAN_API: &str = "https://api.shodan.io/shodan/host/search";

/// How many matches to carry into the enrichment map
const MAX_MATCHES: usize = 5;

pub struct ShodanClient {
    http: Client,
    api_key: String,
}

impl ShodanClient {
    pub fn new(http: Client, api_key: String) -> Self {
        Self { http, api_key }
    }
}

#[derive(Debug, Deserialize)]
struct ShodanSearch {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    matches: Vec<ShodanMatch>,
}

#[derive(Debug, Deserialize)]
struct ShodanMatch {
    #[serde(default)]
    ip_str: Option<String>,
    #[serde(default)]
    port: Option<u32>,
    #[serde(default)]
    org: Option<String>,
}

#[async_trait]
impl Lookup for ShodanClient {
    fn name(&self) -> &'static str {
        "shodan"
    }

    async fn lookup(&self, target: &str) -> Result<Value, LookupError> {
        let query = format!("hostname:{}", target);
        let response = self
            .http
            .get(SHODAN_API)
            .query(&[("key", self.api_key.as_str()), ("query", query.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LookupError::Status(response.status()));
        }

        let search: ShodanSearch = response.json().await?;
        let matches: Vec<Value> = search
            .matches
            .iter()
            .take(MAX_MATCHES)
            .map(|m| {
                json!({
                    "ip": m.ip_str,
                    "port": m.port,
                    "org": m.org,
                })
            })
            .collect();

        Ok(json!({
            "enabled": true,
            "total": search.total,
            "matches": matches,
        }))
    }
}
