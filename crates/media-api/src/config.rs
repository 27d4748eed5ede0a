//! Typed shapes for the controller's config subtrees. Each recognized
//! subtree gets a concrete type; anything we don't need to interpret is
//! kept in a passthrough bucket so forward-compatible fields round-trip
//! untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("stream entry must be a JSON object")]
    InvalidStreamEntry,
    #[error("streams document must be a JSON object mapping name to entry")]
    InvalidStreamsDocument,
}

/// An egress protocol listener. Only `online` is given first-class
/// treatment (dedup ignores it); everything else round-trips through
/// `fields`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Protocol {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Protocol {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => Protocol { fields },
            other => {
                let mut fields = Map::new();
                fields.insert("value".to_string(), other);
                Protocol { fields }
            }
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Drop any member whose value is JSON `null`.
    pub fn remove_null_members(&mut self) {
        self.fields.retain(|_, v| !v.is_null());
    }

    /// Equality used by dedup: every member equal except `online`.
    pub fn equal_ignoring_online(&self, other: &Protocol) -> bool {
        let mut a = self.fields.clone();
        let mut b = other.fields.clone();
        a.remove("online");
        b.remove("online");
        a == b
    }
}

/// A validated `streams[name]` entry. The original only requires it to be
/// an object; we keep the rest as an opaque passthrough value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamEntry(pub Value);

impl StreamEntry {
    pub fn validate(value: Value) -> Result<Self, ConfigError> {
        if value.is_object() {
            Ok(StreamEntry(value))
        } else {
            Err(ConfigError::InvalidStreamEntry)
        }
    }
}

/// Validate a whole `streams=` replacement document: an object mapping
/// stream name to a valid entry. Rejects (doesn't partially apply) if any
/// entry is malformed.
pub fn validate_streams_document(
    value: Value,
) -> Result<std::collections::BTreeMap<String, StreamEntry>, ConfigError> {
    let Value::Object(map) = value else {
        return Err(ConfigError::InvalidStreamsDocument);
    };
    let mut out = std::collections::BTreeMap::new();
    for (name, entry) in map {
        out.insert(name, StreamEntry::validate(entry)?);
    }
    Ok(out)
}

/// One stored account. `password_hash` is `MD5(plaintext)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub password_hash: String,
}

/// One entry in the (append-only) statistics log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: String,
    pub message: String,
    pub unix_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn protocol_equality_ignores_online() {
        let a = Protocol::from_value(json!({"name": "HTTP", "online": 1}));
        let b = Protocol::from_value(json!({"name": "HTTP", "online": 0}));
        assert!(a.equal_ignoring_online(&b));
    }

    #[test]
    fn protocol_equality_respects_other_fields() {
        let a = Protocol::from_value(json!({"name": "HTTP", "port": 80}));
        let b = Protocol::from_value(json!({"name": "HTTP", "port": 8080}));
        assert!(!a.equal_ignoring_online(&b));
    }

    #[test]
    fn null_members_are_stripped() {
        let mut p = Protocol::from_value(json!({"name": "HTTP", "port": null}));
        p.remove_null_members();
        assert!(!p.fields.contains_key("port"));
    }

    #[test]
    fn streams_document_rejects_non_object_entries() {
        let doc = json!({"a": {"source": "x"}, "b": "not-an-object"});
        assert_eq!(
            validate_streams_document(doc),
            Err(ConfigError::InvalidStreamEntry)
        );
    }
}
