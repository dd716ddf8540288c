//! Field-by-field envelope assembly.

use std::borrow::Cow;

use serde_json::{Map, Value};

use super::{Envelope, MessageKind, ModuleVersion, ReplayKeyParts, ValidationErrors};

/// Assembles an [`Envelope`] and validates it with the same rules as raw input.
///
/// When no replay-protection key is supplied, [`EnvelopeBuilder::build`]
/// derives one from the envelope content, so resending the same logical
/// request reuses its key.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeBuilder {
    fields: Map<String, Value>,
    kind: Option<MessageKind>,
}

impl EnvelopeBuilder {
    fn with(mut self, field: &str, value: Value) -> Self {
        self.fields.insert(field.to_owned(), value);
        self
    }

    /// Sets the message id.
    #[must_use]
    pub fn message_id(self, value: impl Into<String>) -> Self {
        self.with("message_id", Value::String(value.into()))
    }

    /// Sets the trace id.
    #[must_use]
    pub fn trace_id(self, value: impl Into<String>) -> Self {
        self.with("trace_id", Value::String(value.into()))
    }

    /// Sets the timestamp in milliseconds.
    #[must_use]
    pub fn timestamp(self, value: u64) -> Self {
        self.with("timestamp", Value::from(value))
    }

    /// Sets the sending module.
    #[must_use]
    pub fn source_module(self, value: impl Into<String>) -> Self {
        self.with("source_module", Value::String(value.into()))
    }

    /// Sets the addressed module.
    #[must_use]
    pub fn target_module(self, value: impl Into<String>) -> Self {
        self.with("target_module", Value::String(value.into()))
    }

    /// Sets the message kind.
    #[must_use]
    pub fn kind(mut self, value: MessageKind) -> Self {
        self.kind = Some(value);
        self.with("kind", Value::String(value.to_string()))
    }

    /// Sets the payload schema (`module.action`).
    #[must_use]
    pub fn payload_schema(self, value: impl Into<String>) -> Self {
        self.with("payload_schema", Value::String(value.into()))
    }

    /// Sets the payload schema version.
    #[must_use]
    pub fn payload_version(self, value: impl Into<String>) -> Self {
        self.with("payload_version", Value::String(value.into()))
    }

    /// Sets the pinned `module@x.y.z` target.
    #[must_use]
    pub fn module_version(self, value: impl Into<String>) -> Self {
        self.with("module_version", Value::String(value.into()))
    }

    /// Sets an explicit replay-protection key.
    #[must_use]
    pub fn replay_protection_key(self, value: impl Into<String>) -> Self {
        self.with("replay_protection_key", Value::String(value.into()))
    }

    /// Sets the payload.
    #[must_use]
    pub fn payload(self, value: Value) -> Self {
        self.with("payload", value)
    }

    /// Sets the parent span id.
    #[must_use]
    pub fn parent_span_id(self, value: impl Into<String>) -> Self {
        self.with("parent_span_id", Value::String(value.into()))
    }

    /// Sets the caller identity claims.
    #[must_use]
    pub fn auth_context(self, value: Map<String, Value>) -> Self {
        self.with("auth_context", Value::Object(value))
    }

    /// Sets the optimistic-concurrency token.
    #[must_use]
    pub fn expected_previous_hash(self, value: impl Into<String>) -> Self {
        self.with("expected_previous_hash", Value::String(value.into()))
    }

    /// Validates the collected fields.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] when any field breaks the envelope contract.
    pub fn build(mut self) -> Result<Envelope, ValidationErrors> {
        if !self.fields.contains_key("replay_protection_key") {
            if let Some(key) = self.derived_replay_key() {
                self.fields
                    .insert("replay_protection_key".to_owned(), Value::String(key));
            }
        }
        Envelope::from_value(&Value::Object(self.fields))
    }

    fn derived_replay_key(&self) -> Option<String> {
        let text = |field: &str| self.fields.get(field).and_then(Value::as_str);
        let parts = ReplayKeyParts {
            source_module: text("source_module")?,
            target_module: text("target_module")?,
            kind: self.kind?,
            payload_schema: text("payload_schema")?,
            payload_version: text("payload_version")?,
            module_version: Cow::Owned(text("module_version")?.parse::<ModuleVersion>().ok()?.key()),
            payload: self.fields.get("payload")?,
            expected_previous_hash: text("expected_previous_hash"),
        };
        Some(parts.replay_key())
    }
}
