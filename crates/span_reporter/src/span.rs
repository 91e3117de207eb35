use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::time::SystemTime;

/// A finished unit of traced work, shaped as a bulk document.
///
/// The reporter accepts any `Serialize` value; this type is the default
/// record for callers that don't bring their own.
#[derive(Debug, Clone, Serialize)]
pub struct Span {
    /// Trace identifier, written as 32 hex digits
    #[serde(serialize_with = "hex_u128")]
    pub trace_id: u128,
    /// Span identifier, written as 16 hex digits
    #[serde(serialize_with = "hex_u64")]
    pub span_id: u64,
    /// Parent span identifier (omitted for root spans)
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "hex_opt_u64")]
    pub parent_id: Option<u64>,
    /// Operation name
    pub name: String,
    pub kind: SpanKind,
    /// Start time (Unix milliseconds)
    #[serde(rename = "@timestamp")]
    pub timestamp_ms: u64,
    /// Duration in milliseconds
    pub duration_ms: f64,
    pub status: SpanStatus,
    /// Free-form tags
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, TagValue>,
}

/// Tag value types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Span execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
    Unset,
}

/// Span kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl Span {
    /// Creates a span starting now.
    pub fn new(trace_id: u128, span_id: u64, name: impl Into<String>, kind: SpanKind) -> Self {
        Self {
            trace_id,
            span_id,
            parent_id: None,
            name: name.into(),
            kind,
            timestamp_ms: unix_millis(SystemTime::now()),
            duration_ms: 0.0,
            status: SpanStatus::Unset,
            tags: HashMap::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Marks the span as completed, measuring duration from its start.
    pub fn finish(&mut self, status: SpanStatus) {
        let now = unix_millis(SystemTime::now());
        self.duration_ms = now.saturating_sub(self.timestamp_ms) as f64;
        self.status = status;
    }
}

fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn hex_u128<S: Serializer>(v: &u128, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&format_args!("{v:032x}"))
}

fn hex_u64<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&format_args!("{v:016x}"))
}

fn hex_opt_u64<S: Serializer>(v: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(v) => hex_u64(v, s),
        None => s.serialize_none(),
    }
}
