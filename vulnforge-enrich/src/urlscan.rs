//! urlscan.io search keyed on the target value

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::traits::{Lookup, LookupError};

const URLSCAN_API: &str = "https://urlscan.io/api/v1/search/";

/// How many scan sightings to carry into the enrichment map
const MAX_RESULTS: usize = 3;

pub struct UrlscanClient {
    http: Client,
    api_key: String,
}

impl UrlscanClient {
    pub fn new(http: Client, api_key: String) -> Self {
        Self { http, api_key }
    }
}

#[derive(Debug, Deserialize)]
struct UrlscanSearch {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    results: Vec<UrlscanResult>,
}

#[derive(Debug, Deserialize)]
struct UrlscanResult {
    #[serde(default)]
    page: UrlscanPage,
    #[serde(default)]
    task: UrlscanTask,
}

#[derive(Debug, Default, Deserialize)]
struct UrlscanPage {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UrlscanTask {
    #[serde(default)]
    time: Option<String>,
}

#[async_trait]
impl Lookup for UrlscanClient {
    fn name(&self) -> &'static str {
        "urlscan"
    }

    async fn lookup(&self, target: &str) -> Result<Value, LookupError> {
        let query = format!("domain:{}", target);
        let response = self
            .http
            .get(URLSCAN_API)
            .query(&[("q", query.as_str())])
            .header("API-Key", &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LookupError::Status(response.status()));
        }

        let search: UrlscanSearch = response.json().await?;
        let sightings: Vec<Value> = search
            .results
            .iter()
            .take(MAX_RESULTS)
            .map(|r| {
                json!({
                    "url": r.page.url,
                    "time": r.task.time,
                })
            })
            .collect();

        Ok(json!({
            "enabled": true,
            "total": search.total,
            "sightings": sightings,
        }))
    }
}
