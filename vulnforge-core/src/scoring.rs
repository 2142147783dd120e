//! Priority scoring - pure combination of confidence, impact, and recency
//!
//! `score = round(confidence * W_c + impact * W_i + timeliness * W_t)`,
//! clamped to [0, 100]. No I/O, fully deterministic.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Weights for the three scoring factors. Factors are in [0, 1], so the
/// weights must sum to at most 100 to keep the score bounded.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub confidence: f64,
    pub impact: f64,
    pub timeliness: f64,
}

#[derive(Debug, Error)]
#[error("score weights must sum to at most 100, got {0}")]
pub struct InvalidWeights(pub f64);

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            confidence: 50.0,
            impact: 30.0,
            timeliness: 20.0,
        }
    }
}

impl ScoreWeights {
    pub fn new(confidence: f64, impact: f64, timeliness: f64) -> Result<Self, InvalidWeights> {
        let sum = confidence + impact + timeliness;
        if sum > 100.0 {
            return Err(InvalidWeights(sum));
        }
        Ok(Self {
            confidence,
            impact,
            timeliness,
        })
    }
}

/// Compute a record's priority score with the default weights.
pub fn compute_score(
    confidence: f64,
    structured_fields: &Map<String, Value>,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
) -> i64 {
    compute_score_with(
        &ScoreWeights::default(),
        confidence,
        structured_fields,
        first_seen,
        last_seen,
    )
}

pub fn compute_score_with(
    weights: &ScoreWeights,
    confidence: f64,
    structured_fields: &Map<String, Value>,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
) -> i64 {
    let confidence = confidence.clamp(0.0, 1.0);
    let impact = impact_factor(structured_fields);
    let timeliness = timeliness_factor(first_seen, last_seen);

    let raw = confidence * weights.confidence + impact * weights.impact
        + timeliness * weights.timeliness;
    (raw.round() as i64).clamp(0, 100)
}

/// Classify impact by the strongest present signal, checked in order with
/// first match winning. The password check deliberately precedes the
/// pii_records check even though pii carries the higher factor; a record
/// with both scores as password.
fn impact_factor(fields: &Map<String, Value>) -> f64 {
    if signal_present(fields.get("token")) {
        1.0
    } else if signal_present(fields.get("password")) || signal_present(fields.get("password_present"))
    {
        0.9
    } else if signal_present(fields.get("pii_records")) {
        0.95
    } else {
        0.4
    }
}

/// A signal counts when its value is truthy, not merely when the key exists.
fn signal_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn timeliness_factor(
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
) -> f64 {
    match (first_seen, last_seen) {
        (Some(first), Some(last)) => {
            let span = last - first;
            if span <= Duration::days(7) {
                1.0
            } else if span <= Duration::days(30) {
                0.7
            } else {
                0.5
            }
        }
        _ => 0.4,
    }
}
