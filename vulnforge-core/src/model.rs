//! Canonical leak model shared by every pipeline stage
//!
//! All producers normalize into [`CanonicalItem`]; the store persists
//! [`LeakRecord`]s keyed by a content-derived [`hash_key`] so repeated
//! observations of the same leak collapse into one record.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// What a leak concerns
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TargetType {
    Domain,
    Email,
    Ip,
    Username,
    /// Unrecognized type labels are preserved verbatim
    Other(String),
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Domain => write!(f, "domain"),
            TargetType::Email => write!(f, "email"),
            TargetType::Ip => write!(f, "ip"),
            TargetType::Username => write!(f, "username"),
            TargetType::Other(label) => write!(f, "{}", label),
        }
    }
}

impl From<&str> for TargetType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "domain" => TargetType::Domain,
            "email" => TargetType::Email,
            "ip" => TargetType::Ip,
            "username" => TargetType::Username,
            other => TargetType::Other(other.to_string()),
        }
    }
}

impl FromStr for TargetType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<TargetType> for String {
    fn from(kind: TargetType) -> Self {
        kind.to_string()
    }
}

impl TryFrom<String> for TargetType {
    type Error = Infallible;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// The subject of a leak. Immutable once part of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "type")]
    pub kind: TargetType,
    pub value: String,
}

impl Target {
    pub fn new(kind: TargetType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// Placeholder target for payloads that name no subject
    pub fn unknown() -> Self {
        Self {
            kind: TargetType::Other("unknown".to_string()),
            value: "unknown".to_string(),
        }
    }
}

/// A normalized leak finding, independent of its original source format.
///
/// `raw` carries the original content unmodified; it is encrypted at
/// persistence time and never stored in plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalItem {
    pub target: Target,
    pub leak_type: String,
    pub source: String,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub structured_fields: Map<String, Value>,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub raw: String,
}

/// The persisted leak entity.
///
/// `enrichment` and `score` are owned by the enrichment worker; producers
/// never set them. The encrypted snippet fields are excluded from JSON so
/// evidence only leaves through the credential-gated decrypt endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LeakRecord {
    pub id: String,
    pub target: Target,
    pub leak_type: String,
    pub source: String,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub raw_ciphertext: Vec<u8>,
    #[serde(skip_serializing)]
    pub raw_nonce: Vec<u8>,
    #[serde(skip_serializing)]
    pub raw_tag: Vec<u8>,
    pub structured_fields: Map<String, Value>,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub enrichment: Map<String, Value>,
    pub score: i64,
    pub notes: Option<String>,
    pub hash_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry in the append-only human review audit trail
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub id: String,
    pub item_id: String,
    pub action: String,
    pub actor: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Content-derived dedup identity: SHA-256 over the lowercased target value,
/// the lowercased leak type, and the raw plaintext bytes.
pub fn hash_key(target_value: &str, leak_type: &str, raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target_value.to_lowercase().as_bytes());
    hasher.update(leak_type.to_lowercase().as_bytes());
    hasher.update(raw);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_case_insensitive_identity() {
        let a = hash_key("Example.COM", "Credentials", b"user:demo");
        let b = hash_key("example.com", "credentials", b"user:demo");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_key_sensitive_to_raw_content() {
        let a = hash_key("example.com", "credentials", b"user:demo");
        let b = hash_key("example.com", "credentials", b"user:other");
        assert_ne!(a, b);
    }

    #[test]
    fn test_target_type_roundtrip() {
        let kind: TargetType = "domain".parse().unwrap();
        assert_eq!(kind, TargetType::Domain);
        assert_eq!(kind.to_string(), "domain");

        let custom: TargetType = "onion".parse().unwrap();
        assert_eq!(custom, TargetType::Other("onion".to_string()));
        assert_eq!(custom.to_string(), "onion");
    }

    #[test]
    fn test_target_serde_uses_type_field() {
        let target = Target::new(TargetType::Email, "demo@example.com");
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["type"], "email");
        assert_eq!(json["value"], "demo@example.com");

        let back: Target = serde_json::from_value(json).unwrap();
        assert_eq!(back, target);
    }
}
