//! Core data types that flow from the HTTP body to the document store.

use serde_json::{Map, Value};

/// Field name injected into every queue entry and promoted to an integer
/// in the stored document.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Field name of the generated document identifier.
pub const ID_FIELD: &str = "id";

/// A parsed event body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    /// Every pair in body order, including `user` and `path`.
    pub pairs: Vec<(String, String)>,
    /// First `user` value, or the placeholder.
    pub user: String,
    /// First `path` value, or the placeholder.
    pub path: String,
}

/// Key identifying one captured event: `<path>:<user>:<timestamp>:<sequence>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey(String);

impl CompositeKey {
    pub fn new(path: &str, user: &str, timestamp: i64, sequence: u16) -> Self {
        Self(format!("{}:{}:{}:{}", path, user, timestamp, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The hash written for one event: its pairs followed by the injected timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub key: CompositeKey,
    pub fields: Vec<(String, String)>,
}

impl QueueEntry {
    /// Builds the entry for `event` received at `timestamp`.
    ///
    /// The timestamp goes last so a client-sent `timestamp` field is overwritten
    /// when the broker applies the fields in order.
    pub fn from_event(event: &ParsedEvent, timestamp: i64, sequence: u16) -> Self {
        let key = CompositeKey::new(&event.path, &event.user, timestamp, sequence);
        let mut fields = Vec::with_capacity(event.pairs.len() + 1);
        fields.extend(event.pairs.iter().cloned());
        fields.push((TIMESTAMP_FIELD.to_string(), timestamp.to_string()));
        Self { key, fields }
    }
}

/// A document ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub timestamp: Option<i64>,
    /// Every other field, as text, in entry order.
    pub fields: Vec<(String, String)>,
}

impl Document {
    /// Builds a document from a flat `field, value, field, value, ...` list.
    ///
    /// Returns `None` unless the list is non-empty and of even length.
    pub fn from_flat_fields(items: &[String]) -> Option<Self> {
        if items.is_empty() || items.len() % 2 != 0 {
            return None;
        }
        let mut timestamp = None;
        let mut fields = Vec::with_capacity(items.len() / 2);
        for pair in items.chunks_exact(2) {
            let (field, value) = (&pair[0], &pair[1]);
            if field == TIMESTAMP_FIELD {
                timestamp = Some(parse_leading_int(value));
            } else {
                fields.push((field.clone(), value.clone()));
            }
        }
        Some(Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            fields,
        })
    }

    /// The persisted JSON shape: `{ "id": ..., "timestamp": ..., "<field>": "<text>" }`.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (field, value) in &self.fields {
            map.insert(field.clone(), Value::String(value.clone()));
        }
        if let Some(ts) = self.timestamp {
            map.insert(TIMESTAMP_FIELD.to_string(), Value::from(ts));
        }
        map.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        Value::Object(map)
    }
}

/// Parses an optional sign followed by digits, ignoring anything after them.
/// Yields `0` when there are no digits or the number overflows.
fn parse_leading_int(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    match digits[..end].parse::<i64>() {
        Ok(n) if negative => -n,
        Ok(n) => n,
        Err(_) => 0,
    }
}
