use chrono::{SecondsFormat, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Typed value read from a controller symbol.
///
/// Serializes untagged, so the JSON payload carries the plain value
/// (`true`, `42`, `23.5`, `"text"`) rather than a variant wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TagValue {
    /// Boolean value (coils, discrete inputs).
    Bool(bool),

    /// Integer value.
    Integer(i64),

    /// Floating-point value.
    Float(f64),

    /// Text value.
    Text(String),
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Integer(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Text(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Text(v.to_string())
    }
}

/// One payload group's message body for a single tick.
///
/// Holds the values in read order as `(description, value)` pairs, plus the
/// timestamp captured when the payload was assembled. Serializes to a JSON
/// object with the `timestamp` key first and the pairs in order; a duplicate
/// description therefore overwrites the earlier value on decode.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPayload {
    timestamp: String,
    entries: Vec<(String, TagValue)>,
}

impl GroupPayload {
    /// Assemble a payload from completed reads, stamping it with the current
    /// time.
    pub fn assemble(entries: Vec<(String, TagValue)>) -> Self {
        Self {
            timestamp: iso8601_now(),
            entries,
        }
    }

    /// Assemble a payload with an explicit timestamp.
    pub fn with_timestamp(timestamp: impl Into<String>, entries: Vec<(String, TagValue)>) -> Self {
        Self {
            timestamp: timestamp.into(),
            entries,
        }
    }

    /// The ISO-8601 UTC instant this payload was assembled at.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// The `(description, value)` pairs in read order.
    pub fn entries(&self) -> &[(String, TagValue)] {
        &self.entries
    }

    /// Encode the payload as a JSON message body.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl Serialize for GroupPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len() + 1))?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Current instant as ISO-8601 UTC with millisecond precision.
pub fn iso8601_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
