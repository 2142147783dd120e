//! Payload normalization - heterogeneous input to canonical items
//!
//! Accepts free text (analyst reports, Markdown), JSON objects, or lists of
//! either, and produces [`CanonicalItem`]s. Field mapping is validated once
//! here so everything downstream works with a typed record.
//!
//! Free text never fails: missing fields fall back to defaults and the item
//! is best-effort. Lists isolate per-element failures. Only a payload that is
//! neither string, object, nor list is rejected.

use std::net::IpAddr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::model::{CanonicalItem, Target, TargetType};
use crate::{DEFAULT_SOURCE, JSON_CONFIDENCE, TEXT_CONFIDENCE};

/// Errors from payload normalization
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("unsupported payload type: {0} (expected string, object, or list)")]
    UnsupportedPayload(&'static str),
}

// Labeled-field patterns for free-text reports. Lines like "Target: x",
// optionally prefixed with Markdown list/emphasis markers.
static FIELD_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\s>*\-#]*target\s*:\s*\*{0,2}(.+?)\*{0,2}\s*$").unwrap()
});

static FIELD_LEAK_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\s>*\-#]*leak\s*type\s*:\s*\*{0,2}(.+?)\*{0,2}\s*$").unwrap()
});

static FIELD_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\s>*\-#]*source\s*:\s*\*{0,2}(.+?)\*{0,2}\s*$").unwrap()
});

static FIELD_FIRST_SEEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\s>*\-#]*first\s*seen\s*:\s*(.+?)\s*$").unwrap()
});

static FIELD_LAST_SEEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\s>*\-#]*last\s*seen\s*:\s*(.+?)\s*$").unwrap()
});

static FIELD_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^[\s>*\-#]*tags\s*:\s*(.+?)\s*$").unwrap());

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,4}\s+(.+?)\s*$").unwrap());

static INLINE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\B#([a-z0-9][a-z0-9_-]{1,31})\b").unwrap());

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b").unwrap()
});

static PASSWORD_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpass(?:word)?\b\s*[:=]").unwrap());

static EMBEDDED_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").unwrap());

/// Leak-type keywords recognized in section headers when no labeled field
/// names one.
const HEADER_LEAK_TYPES: &[&str] = &["credentials", "token", "pii", "database", "combo"];

/// Normalize an arbitrary payload into canonical items.
///
/// `fallback_source` is the ingest-time source label, used when the payload
/// itself names no provenance.
pub fn normalize(
    payload: &Value,
    fallback_source: &str,
) -> Result<Vec<CanonicalItem>, NormalizeError> {
    match payload {
        Value::String(text) => Ok(vec![normalize_text(text, fallback_source)]),
        Value::Object(map) => Ok(vec![normalize_object(map, fallback_source)]),
        Value::Array(elements) => {
            let mut items = Vec::with_capacity(elements.len());
            for (idx, element) in elements.iter().enumerate() {
                // One bad element must not abort the rest of the batch
                match element {
                    Value::String(text) => items.push(normalize_text(text, fallback_source)),
                    Value::Object(map) => items.push(normalize_object(map, fallback_source)),
                    other => {
                        warn!(
                            "skipping list element {}: unsupported type {}",
                            idx,
                            value_kind(other)
                        );
                    }
                }
            }
            Ok(items)
        }
        other => Err(NormalizeError::UnsupportedPayload(value_kind(other))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Best-effort extraction from free text or Markdown. Never fails.
pub fn normalize_text(text: &str, fallback_source: &str) -> CanonicalItem {
    let target = match first_capture(&FIELD_TARGET, text) {
        Some(value) => Target::new(infer_target_kind(&value), value),
        None => Target::unknown(),
    };

    let leak_type = first_capture(&FIELD_LEAK_TYPE, text)
        .map(|s| s.to_lowercase())
        .or_else(|| header_leak_type(text))
        .unwrap_or_else(|| "unknown".to_string());

    let source = first_capture(&FIELD_SOURCE, text)
        .unwrap_or_else(|| pick_source(fallback_source));

    let first_seen = first_capture(&FIELD_FIRST_SEEN, text).and_then(|s| parse_timestamp(&s));
    let last_seen = first_capture(&FIELD_LAST_SEEN, text).and_then(|s| parse_timestamp(&s));

    let mut tags: Vec<String> = Vec::new();
    if let Some(listed) = first_capture(&FIELD_TAGS, text) {
        for tag in listed.split(',') {
            push_tag(&mut tags, tag.trim());
        }
    }
    for cap in INLINE_TAG.captures_iter(text) {
        push_tag(&mut tags, &cap[1]);
    }

    let mut structured_fields = Map::new();
    if let Some(email) = EMAIL.find(text) {
        structured_fields.insert("email".to_string(), Value::from(email.as_str()));
    }
    if PASSWORD_HINT.is_match(text) {
        structured_fields.insert("password_present".to_string(), Value::Bool(true));
    }

    CanonicalItem {
        target,
        leak_type,
        source,
        first_seen,
        last_seen,
        structured_fields,
        confidence: TEXT_CONFIDENCE,
        tags,
        notes: None,
        raw: text.to_string(),
    }
}

/// Map a JSON object with named fallback rules per field.
fn normalize_object(map: &Map<String, Value>, fallback_source: &str) -> CanonicalItem {
    let (kind, value) = extract_target(map.get("target"));
    let target = match value {
        Some(value) => {
            let kind = kind
                .map(|k| TargetType::from(k.as_str()))
                .unwrap_or_else(|| infer_target_kind(&value));
            Target::new(kind, value)
        }
        None => Target::unknown(),
    };

    // leak_type falls back to category
    let leak_type = string_field(map, "leak_type")
        .or_else(|| string_field(map, "category"))
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| "unknown".to_string());

    let source = string_field(map, "source").unwrap_or_else(|| pick_source(fallback_source));

    let first_seen = string_field(map, "first_seen").and_then(|s| parse_timestamp(&s));
    let last_seen = string_field(map, "last_seen").and_then(|s| parse_timestamp(&s));

    let confidence = map
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(JSON_CONFIDENCE)
        .clamp(0.0, 1.0);

    let mut tags = Vec::new();
    if let Some(Value::Array(listed)) = map.get("tags") {
        for tag in listed {
            if let Some(tag) = tag.as_str() {
                push_tag(&mut tags, tag);
            }
        }
    }

    let structured_fields = match map.get("structured_fields") {
        Some(Value::Object(fields)) => fields.clone(),
        _ => Map::new(),
    };

    let notes = string_field(map, "notes");

    // Original content for later encryption: an explicit snippet field if
    // present, else the serialized payload itself.
    let raw = string_field(map, "raw_snippet")
        .or_else(|| string_field(map, "raw"))
        .unwrap_or_else(|| Value::Object(map.clone()).to_string());

    CanonicalItem {
        target,
        leak_type,
        source,
        first_seen,
        last_seen,
        structured_fields,
        confidence,
        tags,
        notes,
        raw,
    }
}

/// `target` may be an object (`value` falling back to `name`) or a bare
/// string. Returns (declared type, value).
fn extract_target(target: Option<&Value>) -> (Option<String>, Option<String>) {
    match target {
        Some(Value::Object(t)) => {
            let kind = t.get("type").and_then(Value::as_str).map(str::to_string);
            let value = t
                .get("value")
                .or_else(|| t.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string);
            (kind, value)
        }
        Some(Value::String(value)) => (None, Some(value.clone())),
        _ => (None, None),
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn pick_source(fallback_source: &str) -> String {
    let label = fallback_source.trim();
    if label.is_empty() {
        DEFAULT_SOURCE.to_string()
    } else {
        label.to_string()
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn header_leak_type(text: &str) -> Option<String> {
    for cap in SECTION_HEADER.captures_iter(text) {
        let header = cap[1].to_lowercase();
        for keyword in HEADER_LEAK_TYPES {
            if header.contains(keyword) {
                return Some(keyword.to_string());
            }
        }
    }
    None
}

fn push_tag(tags: &mut Vec<String>, tag: &str) {
    let tag = tag.trim().to_lowercase();
    if !tag.is_empty() && !tags.contains(&tag) {
        tags.push(tag);
    }
}

fn infer_target_kind(value: &str) -> TargetType {
    if EMAIL.is_match(value) {
        TargetType::Email
    } else if value.parse::<IpAddr>().is_ok() {
        TargetType::Ip
    } else if value.contains('.') {
        TargetType::Domain
    } else {
        TargetType::Username
    }
}

/// Permissive timestamp parsing: an ordered chain of pure attempts,
/// first success wins.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    parse_rfc3339(s)
        .or_else(|| parse_naive_datetime(s))
        .or_else(|| parse_bare_date(s))
        .or_else(|| scan_embedded_date(s))
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_naive_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_bare_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn scan_embedded_date(s: &str) -> Option<DateTime<Utc>> {
    EMBEDDED_DATE
        .captures(s)
        .and_then(|c| parse_bare_date(&c[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_markdown_report_extraction() {
        let report = "\
## Leak Report

Target: example.com
Leak Type: Credentials
Source: forum
First Seen: 2024-08-01
Last Seen: 2024-08-05

Credential dump observed for admin@example.com.
";
        let item = normalize_text(report, DEFAULT_SOURCE);
        assert_eq!(item.target.value, "example.com");
        assert_eq!(item.target.kind, TargetType::Domain);
        assert_eq!(item.leak_type, "credentials");
        assert_eq!(item.source, "forum");
        assert_eq!(
            item.first_seen.unwrap().date_naive().to_string(),
            "2024-08-01"
        );
        assert_eq!(
            item.last_seen.unwrap().date_naive().to_string(),
            "2024-08-05"
        );
        assert_eq!(
            item.structured_fields["email"],
            Value::from("admin@example.com")
        );
        assert_eq!(item.confidence, TEXT_CONFIDENCE);
        assert_eq!(item.raw, report);
    }

    #[test]
    fn test_malformed_text_still_yields_item() {
        let item = normalize_text("garbled ???", DEFAULT_SOURCE);
        assert_eq!(item.target.value, "unknown");
        assert_eq!(item.leak_type, "unknown");
        assert_eq!(item.source, "robin");
    }

    #[test]
    fn test_inline_tags_and_header_leak_type() {
        let text = "# Fresh credentials drop\n\nseen on market #ransomware #combo-list\n";
        let item = normalize_text(text, DEFAULT_SOURCE);
        assert_eq!(item.leak_type, "credentials");
        assert!(item.tags.contains(&"ransomware".to_string()));
        assert!(item.tags.contains(&"combo-list".to_string()));
    }

    #[test]
    fn test_object_field_fallbacks() {
        let payload = json!({
            "target": {"name": "10.0.0.5"},
            "category": "token",
            "first_seen": "2024-07-01T12:00:00Z",
        });
        let items = normalize(&payload, DEFAULT_SOURCE).unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.target.value, "10.0.0.5");
        assert_eq!(item.target.kind, TargetType::Ip);
        assert_eq!(item.leak_type, "token");
        assert_eq!(item.source, "robin");
        assert_eq!(item.confidence, JSON_CONFIDENCE);
        assert!(item.first_seen.is_some());
        // No raw field: the serialized payload stands in
        assert!(item.raw.contains("10.0.0.5"));
    }

    #[test]
    fn test_object_explicit_fields_win() {
        let payload = json!({
            "target": {"type": "domain", "value": "Example.com"},
            "leak_type": "credentials",
            "source": "paste-monitor",
            "confidence": 0.85,
            "tags": ["combo", "fresh"],
            "structured_fields": {"email": "a@b.io", "password_present": true},
            "raw": "a@b.io:hunter2",
        });
        let item = &normalize(&payload, DEFAULT_SOURCE).unwrap()[0];
        assert_eq!(item.target.kind, TargetType::Domain);
        assert_eq!(item.source, "paste-monitor");
        assert_eq!(item.confidence, 0.85);
        assert_eq!(item.tags, vec!["combo", "fresh"]);
        assert_eq!(item.raw, "a@b.io:hunter2");
    }

    #[test]
    fn test_list_isolates_bad_elements() {
        let payload = json!([
            {"target": {"value": "one.example"}, "leak_type": "credentials"},
            42,
            {"target": {"value": "three.example"}, "leak_type": "token"},
        ]);
        let items = normalize(&payload, DEFAULT_SOURCE).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].target.value, "one.example");
        assert_eq!(items[1].target.value, "three.example");
    }

    #[test]
    fn test_unsupported_payload_rejected() {
        let err = normalize(&json!(17), DEFAULT_SOURCE).unwrap_err();
        assert!(matches!(err, NormalizeError::UnsupportedPayload("number")));
        assert!(normalize(&Value::Null, DEFAULT_SOURCE).is_err());
    }

    #[test]
    fn test_timestamp_parse_chain() {
        assert!(parse_timestamp("2024-08-01T10:30:00Z").is_some());
        assert!(parse_timestamp("2024-08-01 10:30:00").is_some());
        assert!(parse_timestamp("2024-08-01").is_some());
        assert_eq!(
            parse_timestamp("observed around 2024-08-01 on the forum")
                .unwrap()
                .date_naive()
                .to_string(),
            "2024-08-01"
        );
        assert!(parse_timestamp("last tuesday").is_none());
    }

    #[test]
    fn test_source_label_fallback_order() {
        // Payload-declared source beats the ingest label; the label beats
        // the built-in default.
        let declared = json!({"source": "feed-a", "target": {"value": "x.io"}});
        assert_eq!(normalize(&declared, "watcher").unwrap()[0].source, "feed-a");

        let bare = json!({"target": {"value": "x.io"}});
        assert_eq!(normalize(&bare, "watcher").unwrap()[0].source, "watcher");
        assert_eq!(normalize(&bare, "").unwrap()[0].source, "robin");
    }
}
