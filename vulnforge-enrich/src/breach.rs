//! Breach-database lookup (HIBP-compatible API)
//!
//! Checks whether an email address appears in known breach corpora. A 404
//! from the API means "not in any breach" and is a successful, empty result.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::traits::{Lookup, LookupError};

const BREACH_API: &str = "https://haveibeenpwned.com/api/v3/breachedaccount";

pub struct BreachClient {
    http: Client,
    api_key: String,
}

impl BreachClient {
    pub fn new(http: Client, api_key: String) -> Self {
        Self { http, api_key }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BreachEntry {
    name: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    breach_date: Option<String>,
}

#[async_trait]
impl Lookup for BreachClient {
    fn name(&self) -> &'static str {
        "breach_db"
    }

    async fn lookup(&self, email: &str) -> Result<Value, LookupError> {
        let url = format!("{}/{}", BREACH_API, email);
        let response = self
            .http
            .get(&url)
            .query(&[("truncateResponse", "false")])
            .header("hibp-api-key", &self.api_key)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(json!({"enabled": true, "count": 0, "breaches": []}));
        }
        if !response.status().is_success() {
            return Err(LookupError::Status(response.status()));
        }

        let entries: Vec<BreachEntry> = response.json().await?;
        let breaches: Vec<Value> = entries
            .iter()
            .map(|b| {
                json!({
                    "name": b.name,
                    "domain": b.domain,
                    "breach_date": b.breach_date,
                })
            })
            .collect();

        Ok(json!({
            "enabled": true,
            "count": entries.len(),
            "breaches": breaches,
        }))
    }
}
