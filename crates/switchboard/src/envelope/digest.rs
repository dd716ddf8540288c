//! Canonical hashing of envelope content.
//!
//! Values are fed to SHA-256 through a self-delimiting encoding in which
//! object keys are visited in sorted order, so digests do not depend on the
//! key order of the input document.

use std::borrow::Cow;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{Envelope, MessageKind};

/// Prefix applied to content-derived replay keys.
pub const REPLAY_KEY_PREFIX: &str = "rpk-";

/// The logical content of an envelope from which a replay key is derived.
///
/// Identity fields such as the message id, trace id and timestamp are
/// excluded, so resending the same request yields the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayKeyParts<'a> {
    /// Sending module.
    pub source_module: &'a str,
    /// Addressed module.
    pub target_module: &'a str,
    /// Command or query.
    pub kind: MessageKind,
    /// Payload schema.
    pub payload_schema: &'a str,
    /// Payload schema version.
    pub payload_version: &'a str,
    /// Pinned `module@x.y.z` string.
    pub module_version: Cow<'a, str>,
    /// Request payload.
    pub payload: &'a Value,
    /// Optional optimistic-concurrency token.
    pub expected_previous_hash: Option<&'a str>,
}

impl ReplayKeyParts<'_> {
    /// Derives the `rpk-` prefixed hex replay key.
    #[must_use]
    pub fn replay_key(&self) -> String {
        let mut hasher = Sha256::new();
        feed_str(&mut hasher, self.source_module);
        feed_str(&mut hasher, self.target_module);
        feed_str(&mut hasher, self.kind.to_string().as_str());
        feed_str(&mut hasher, self.payload_schema);
        feed_str(&mut hasher, self.payload_version);
        feed_str(&mut hasher, &self.module_version);
        feed_value(&mut hasher, self.payload);
        feed_optional(&mut hasher, self.expected_previous_hash);
        format!("{REPLAY_KEY_PREFIX}{}", hex::encode(hasher.finalize()))
    }
}

pub(super) fn envelope_digest(envelope: &Envelope) -> String {
    let mut hasher = Sha256::new();
    feed_str(&mut hasher, &envelope.message_id);
    feed_str(&mut hasher, &envelope.trace_id);
    feed_str(&mut hasher, &envelope.timestamp.to_string());
    feed_str(&mut hasher, &envelope.source_module);
    feed_str(&mut hasher, &envelope.target_module);
    feed_str(&mut hasher, envelope.kind.to_string().as_str());
    feed_str(&mut hasher, &envelope.payload_schema);
    feed_str(&mut hasher, &envelope.payload_version);
    feed_str(&mut hasher, &envelope.module_version.key());
    feed_str(&mut hasher, &envelope.replay_protection_key);
    feed_value(&mut hasher, &envelope.payload);
    feed_optional(&mut hasher, envelope.parent_span_id.as_deref());
    match &envelope.auth_context {
        Some(context) => {
            hasher.update(b"A");
            feed_object(&mut hasher, context);
        }
        None => hasher.update(b"-"),
    }
    feed_optional(&mut hasher, envelope.expected_previous_hash.as_deref());
    hex::encode(hasher.finalize())
}

/// Hex SHA-256 of a JSON value under the canonical encoding.
pub(crate) fn value_digest(value: &Value) -> String {
    let mut hasher = Sha256::new();
    feed_value(&mut hasher, value);
    hex::encode(hasher.finalize())
}

pub(crate) fn feed_str(hasher: &mut Sha256, text: &str) {
    hasher.update(text.len().to_string().as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
}

fn feed_optional(hasher: &mut Sha256, text: Option<&str>) {
    match text {
        Some(inner) => {
            hasher.update(b"S");
            feed_str(hasher, inner);
        }
        None => hasher.update(b"-"),
    }
}

fn feed_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(true) => hasher.update(b"t"),
        Value::Bool(false) => hasher.update(b"f"),
        Value::Number(number) => {
            hasher.update(b"d");
            feed_str(hasher, &number.to_string());
        }
        Value::String(text) => {
            hasher.update(b"s");
            feed_str(hasher, text);
        }
        Value::Array(items) => {
            hasher.update(b"[");
            hasher.update(items.len().to_string().as_bytes());
            for item in items {
                feed_value(hasher, item);
            }
            hasher.update(b"]");
        }
        Value::Object(map) => feed_object(hasher, map),
    }
}

fn feed_object(hasher: &mut Sha256, map: &serde_json::Map<String, Value>) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|left, right| left.0.cmp(right.0));
    hasher.update(b"{");
    hasher.update(entries.len().to_string().as_bytes());
    for (key, entry) in entries {
        feed_str(hasher, key);
        feed_value(hasher, entry);
    }
    hasher.update(b"}");
}
