//! Common interface for enrichment collaborators

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::breach::BreachClient;
use crate::certs::CertClient;
use crate::retry::with_retry;
use crate::shodan::ShodanClient;
use crate::urlscan::UrlscanClient;

/// Errors from a single lookup attempt
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),
}

/// One external lookup collaborator. The key is either an email address or
/// the record's target value, depending on the collaborator.
#[async_trait]
pub trait Lookup: Send + Sync {
    /// Collaborator name, used as the enrichment sub-key
    fn name(&self) -> &'static str;

    async fn lookup(&self, key: &str) -> Result<Value, LookupError>;
}

/// Configuration for the external collaborators. Every credential is
/// independently optional; a missing one disables only that lookup.
#[derive(Debug, Clone)]
pub struct LookupConfig {
    pub hibp_api_key: Option<String>,
    pub shodan_api_key: Option<String>,
    pub urlscan_api_key: Option<String>,
    pub enable_crtsh: bool,
    /// Per-request timeout applied on the HTTP client
    pub timeout: Duration,
    /// Total attempts per lookup before degrading to an error field
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            hibp_api_key: None,
            shodan_api_key: None,
            urlscan_api_key: None,
            enable_crtsh: false,
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// The set of configured collaborators a worker fans out to.
pub struct LookupSet {
    breach: Option<Box<dyn Lookup>>,
    shodan: Option<Box<dyn Lookup>>,
    certs: Option<Box<dyn Lookup>>,
    urlscan: Option<Box<dyn Lookup>>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl LookupSet {
    pub fn new(config: LookupConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("vulnforge-robin/0.1")
            .build()?;

        let breach = config
            .hibp_api_key
            .map(|key| Box::new(BreachClient::new(http.clone(), key)) as Box<dyn Lookup>);
        let shodan = config
            .shodan_api_key
            .map(|key| Box::new(ShodanClient::new(http.clone(), key)) as Box<dyn Lookup>);
        let certs = config
            .enable_crtsh
            .then(|| Box::new(CertClient::new(http.clone())) as Box<dyn Lookup>);
        let urlscan = config
            .urlscan_api_key
            .map(|key| Box::new(UrlscanClient::new(http.clone(), key)) as Box<dyn Lookup>);

        Ok(Self {
            breach,
            shodan,
            certs,
            urlscan,
            max_attempts: config.max_attempts,
            backoff_base: config.backoff_base,
        })
    }

    /// A set with every collaborator disabled.
    pub fn disabled() -> Self {
        Self {
            breach: None,
            shodan: None,
            certs: None,
            urlscan: None,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }

    /// Assemble a set from explicit collaborators. Used by tests to inject
    /// stand-ins.
    pub fn from_parts(
        breach: Option<Box<dyn Lookup>>,
        shodan: Option<Box<dyn Lookup>>,
        certs: Option<Box<dyn Lookup>>,
        urlscan: Option<Box<dyn Lookup>>,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            breach,
            shodan,
            certs,
            urlscan,
            max_attempts,
            backoff_base,
        }
    }

    /// Breach-database check. `email` is the record's email-shaped
    /// structured field, when it has one.
    pub async fn breach(&self, email: Option<&str>) -> Value {
        let Some(client) = &self.breach else {
            return json!({"enabled": false});
        };
        let Some(email) = email.filter(|e| e.contains('@')) else {
            return json!({"enabled": true, "skipped": "no email field"});
        };
        self.run(client.as_ref(), email).await
    }

    pub async fn shodan(&self, target: &str) -> Value {
        match &self.shodan {
            Some(client) => self.run(client.as_ref(), target).await,
            None => json!({"enabled": false}),
        }
    }

    pub async fn certs(&self, target: &str) -> Value {
        match &self.certs {
            Some(client) => self.run(client.as_ref(), target).await,
            None => json!({"enabled": false}),
        }
    }

    pub async fn urlscan(&self, target: &str) -> Value {
        match &self.urlscan {
            Some(client) => self.run(client.as_ref(), target).await,
            None => json!({"enabled": false}),
        }
    }

    /// Run one lookup with retry/backoff; a final failure becomes an error
    /// field, never a propagated error.
    async fn run(&self, client: &dyn Lookup, key: &str) -> Value {
        match with_retry(self.max_attempts, self.backoff_base, || {
            client.lookup(key)
        })
        .await
        {
            Ok(value) => value,
            Err(e) => {
                debug!("{} lookup failed after retries: {}", client.name(), e);
                json!({"error": e.to_string()})
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_set_reports_enabled_false() {
        let set = LookupSet::disabled();
        assert_eq!(set.breach(Some("a@b.io")).await, json!({"enabled": false}));
        assert_eq!(set.shodan("example.com").await, json!({"enabled": false}));
        assert_eq!(set.certs("example.com").await, json!({"enabled": false}));
        assert_eq!(set.urlscan("example.com").await, json!({"enabled": false}));
    }

    struct Fixed;

    #[async_trait]
    impl Lookup for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn lookup(&self, _key: &str) -> Result<Value, LookupError> {
            Ok(json!({"enabled": true, "hits": 2}))
        }
    }

    #[tokio::test]
    async fn test_breach_skips_without_email_shaped_key() {
        let set = LookupSet::from_parts(
            Some(Box::new(Fixed)),
            None,
            None,
            None,
            1,
            Duration::from_millis(1),
        );
        let skipped = set.breach(None).await;
        assert_eq!(skipped["skipped"], json!("no email field"));
        let skipped = set.breach(Some("not-an-email")).await;
        assert_eq!(skipped["skipped"], json!("no email field"));
        let hit = set.breach(Some("a@b.io")).await;
        assert_eq!(hit["hits"], json!(2));
    }
}
