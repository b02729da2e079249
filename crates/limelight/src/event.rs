//! Application events and priority classification
//!
//! An event is an immutable key/value payload plus a priority, a creation
//! timestamp, and the id of the producer that emitted it. Events are created
//! by producer adapters, classified once by the router, and shared as
//! `Arc<Event>` across consumer dispatches - never mutated after creation.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use limeconf::PriorityConfig;

/// Open key/value payload carried by every event
pub type Payload = Map<String, Value>;

/// Strict dispatch priority, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// All levels, highest first - scan order for every drain loop
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Queue lane index (0 = critical)
    pub fn lane(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        write!(f, "{label}")
    }
}

/// Opaque id of the producer an event came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// An immutable routed event
#[derive(Debug, Clone)]
pub struct Event {
    pub source: SourceId,
    pub priority: Priority,
    pub payload: Payload,
    /// Wall-clock time, for logs and external monitoring
    pub created_at: DateTime<Utc>,
    /// Monotonic time, for dispatch latency measurement
    pub created: Instant,
}

impl Event {
    pub fn new(source: SourceId, priority: Priority, payload: Payload) -> Self {
        Self {
            source,
            priority,
            payload,
            created_at: Utc::now(),
            created: Instant::now(),
        }
    }

    /// Whether a `fire` key is present at all (drives mode auto-detection)
    pub fn has_fire_flag(&self) -> bool {
        self.payload.contains_key("fire")
    }

    /// Whether the `fire` flag is set (truthy bool or non-zero integer)
    pub fn fire(&self) -> bool {
        match self.payload.get("fire") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
            _ => false,
        }
    }

    /// The carried value, if any
    pub fn value(&self) -> Option<&Value> {
        self.payload.get("value")
    }
}

/// Content-based priority rules.
///
/// The tag sets are site policy loaded from configuration; the defaults are
/// illustrative wiring, not a protocol contract.
#[derive(Debug, Clone)]
pub struct PriorityPolicy {
    critical: Vec<String>,
    high: Vec<String>,
    low: Vec<String>,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self::from_config(&PriorityConfig::default())
    }
}

impl PriorityPolicy {
    pub fn from_config(config: &PriorityConfig) -> Self {
        Self {
            critical: config.critical_tags.clone(),
            high: config.high_tags.clone(),
            low: config.low_tags.clone(),
        }
    }

    /// Classify a payload by its tag. Untagged or unknown tags are NORMAL.
    pub fn classify(&self, payload: &Payload) -> Priority {
        let Some(tag) = payload.get("tag").and_then(Value::as_str) else {
            return Priority::Normal;
        };
        if self.critical.iter().any(|t| t == tag) {
            Priority::Critical
        } else if self.high.iter().any(|t| t == tag) {
            Priority::High
        } else if self.low.iter().any(|t| t == tag) {
            Priority::Low
        } else {
            Priority::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(entries: &[(&str, Value)]) -> Payload {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_default_policy_tags() {
        let policy = PriorityPolicy::default();
        assert_eq!(
            policy.classify(&payload(&[("tag", json!("audio_trigger"))])),
            Priority::Critical
        );
        assert_eq!(
            policy.classify(&payload(&[("tag", json!("user_input"))])),
            Priority::High
        );
        assert_eq!(
            policy.classify(&payload(&[("tag", json!("diagnostic"))])),
            Priority::Low
        );
        assert_eq!(
            policy.classify(&payload(&[("tag", json!("whatever"))])),
            Priority::Normal
        );
        assert_eq!(policy.classify(&payload(&[])), Priority::Normal);
    }

    #[test]
    fn test_fire_flag_forms() {
        let ev = Event::new(
            SourceId::new("pad"),
            Priority::Normal,
            payload(&[("fire", json!(true))]),
        );
        assert!(ev.has_fire_flag());
        assert!(ev.fire());

        let ev = Event::new(
            SourceId::new("pad"),
            Priority::Normal,
            payload(&[("fire", json!(0))]),
        );
        assert!(ev.has_fire_flag());
        assert!(!ev.fire());

        let ev = Event::new(SourceId::new("pad"), Priority::Normal, payload(&[]));
        assert!(!ev.has_fire_flag());
        assert!(!ev.fire());
    }

    #[test]
    fn test_priority_lane_order() {
        for (i, p) in Priority::ALL.iter().enumerate() {
            assert_eq!(p.lane(), i);
        }
        assert!(Priority::Critical < Priority::Low);
    }
}
