//! The typed envelope accepted by the dispatcher.
//!
//! Raw input is parsed by [`Envelope::from_value`], which checks the strict
//! field contract and reports every problem it finds. A parsed envelope is
//! immutable; callers read it through accessors.

mod builder;
pub(crate) mod digest;
mod validate;
mod version;

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

pub use builder::EnvelopeBuilder;
pub use digest::ReplayKeyParts;
pub use validate::{EnvelopeError, ValidationErrors};
pub use version::{ModuleVersion, Version, VersionParseError};

pub(crate) use validate::raw_trace_id;

/// Whether an envelope asks a module to change state or to answer a question.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageKind {
    /// A state-changing request.
    Command,
    /// A read-only request.
    Query,
}

/// A validated unit of dispatch work addressed to a pinned module version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    message_id: String,
    trace_id: String,
    timestamp: u64,
    source_module: String,
    target_module: String,
    kind: MessageKind,
    payload_schema: String,
    payload_version: String,
    module_version: ModuleVersion,
    replay_protection_key: String,
    payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_context: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected_previous_hash: Option<String>,
}

impl Envelope {
    /// Parses and validates untyped input.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] listing every contract violation found.
    pub fn from_value(raw: &Value) -> Result<Self, ValidationErrors> {
        validate::parse(raw)
    }

    /// Starts assembling an envelope field by field.
    #[must_use]
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::default()
    }

    /// Unique identifier of this send.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Identifier grouping related dispatches.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Sender-supplied timestamp in milliseconds.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Module that sent the envelope.
    #[must_use]
    pub fn source_module(&self) -> &str {
        &self.source_module
    }

    /// Module the envelope is addressed to.
    #[must_use]
    pub fn target_module(&self) -> &str {
        &self.target_module
    }

    /// Command or query.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Payload schema in `module.action` form.
    #[must_use]
    pub fn payload_schema(&self) -> &str {
        &self.payload_schema
    }

    /// The `(module, action)` halves of the payload schema.
    #[must_use]
    pub fn payload_schema_parts(&self) -> (&str, &str) {
        split_payload_schema(&self.payload_schema).unwrap_or((self.payload_schema.as_str(), ""))
    }

    /// Version of the payload schema.
    #[must_use]
    pub fn payload_version(&self) -> &str {
        &self.payload_version
    }

    /// Pinned handler module and version.
    #[must_use]
    pub const fn module_version(&self) -> &ModuleVersion {
        &self.module_version
    }

    /// Caller-supplied idempotency token.
    #[must_use]
    pub fn replay_protection_key(&self) -> &str {
        &self.replay_protection_key
    }

    /// Opaque payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Span that caused this envelope, when known.
    #[must_use]
    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    /// Caller identity claims, when supplied.
    #[must_use]
    pub const fn auth_context(&self) -> Option<&Map<String, Value>> {
        self.auth_context.as_ref()
    }

    /// Optimistic-concurrency token for state-changing handlers.
    #[must_use]
    pub fn expected_previous_hash(&self) -> Option<&str> {
        self.expected_previous_hash.as_deref()
    }

    /// Content fields that feed the derived replay key.
    #[must_use]
    pub fn replay_key_parts(&self) -> ReplayKeyParts<'_> {
        ReplayKeyParts {
            source_module: &self.source_module,
            target_module: &self.target_module,
            kind: self.kind,
            payload_schema: &self.payload_schema,
            payload_version: &self.payload_version,
            module_version: Cow::Owned(self.module_version.key()),
            payload: &self.payload,
            expected_previous_hash: self.expected_previous_hash.as_deref(),
        }
    }

    /// Whether the replay key equals the one derived from the content.
    ///
    /// Envelopes carrying a caller-chosen key return `false`.
    #[must_use]
    pub fn verify_replay_key(&self) -> bool {
        self.replay_key_parts().replay_key() == self.replay_protection_key
    }

    /// Whether two envelopes share a replay-protection key.
    #[must_use]
    pub fn is_same_replay_key(&self, other: &Self) -> bool {
        self.replay_protection_key == other.replay_protection_key
    }

    /// Hex SHA-256 digest over every field of the envelope.
    #[must_use]
    pub fn digest(&self) -> String {
        digest::envelope_digest(self)
    }
}

/// Splits a `module.action` schema, rejecting anything without exactly one dot.
#[must_use]
pub fn split_payload_schema(schema: &str) -> Option<(&str, &str)> {
    let (module, action) = schema.split_once('.')?;
    let valid = !module.trim().is_empty() && !action.trim().is_empty() && !action.contains('.');
    valid.then_some((module, action))
}

#[cfg(test)]
mod tests;
