//! Strict structural validation of raw envelope input.

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use super::{Envelope, MessageKind, ModuleVersion, VersionParseError, split_payload_schema};

/// Trace id recorded when the raw input carries none.
pub(crate) const UNKNOWN_TRACE_ID: &str = "unknown";

const REQUIRED_FIELDS: [&str; 11] = [
    "message_id",
    "trace_id",
    "timestamp",
    "source_module",
    "target_module",
    "kind",
    "payload_schema",
    "payload_version",
    "module_version",
    "replay_protection_key",
    "payload",
];

const OPTIONAL_FIELDS: [&str; 3] = ["parent_span_id", "auth_context", "expected_previous_hash"];

/// A single envelope contract violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The input was not a JSON object.
    #[error("envelope must be an object, found {found}")]
    NotAnObject {
        /// JSON type that was supplied instead.
        found: &'static str,
    },

    /// A required field was absent.
    #[error("missing required field '{field}'")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
    },

    /// A field carried the wrong JSON type.
    #[error("field '{field}' must be {expected}")]
    WrongType {
        /// Name of the field.
        field: &'static str,
        /// Description of the expected type.
        expected: &'static str,
    },

    /// A string field was empty or only whitespace.
    #[error("field '{field}' must not be empty")]
    EmptyField {
        /// Name of the field.
        field: &'static str,
    },

    /// The input carried a field outside the envelope contract.
    #[error("unknown field '{field}'")]
    UnknownField {
        /// Name of the unexpected field.
        field: String,
    },

    /// `kind` was neither `command` nor `query`.
    #[error("kind '{value}' is not one of command, query")]
    InvalidKind {
        /// Rejected value.
        value: String,
    },

    /// `payload_schema` was not of the form `module.action`.
    #[error("payload schema '{value}' must be of the form module.action")]
    InvalidPayloadSchema {
        /// Rejected value.
        value: String,
    },

    /// `module_version` did not parse as `module@major.minor.patch`.
    #[error("invalid module version: {source}")]
    InvalidModuleVersion {
        /// Parser failure.
        #[source]
        source: VersionParseError,
    },
}

/// Every contract violation found in one raw input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid envelope: {}", Summary(.0))]
pub struct ValidationErrors(Vec<EnvelopeError>);

impl ValidationErrors {
    /// Individual violations in field order.
    #[must_use]
    pub fn issues(&self) -> &[EnvelopeError] {
        &self.0
    }

    /// Number of violations.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false` for errors produced by validation.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct Summary<'a>(&'a [EnvelopeError]);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, issue) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

/// Best-effort trace id for records about input that failed validation.
pub(crate) fn raw_trace_id(raw: &Value) -> &str {
    raw.get("trace_id")
        .and_then(Value::as_str)
        .filter(|trace| !trace.trim().is_empty())
        .unwrap_or(UNKNOWN_TRACE_ID)
}

pub(super) fn parse(raw: &Value) -> Result<Envelope, ValidationErrors> {
    let Value::Object(map) = raw else {
        return Err(ValidationErrors(vec![EnvelopeError::NotAnObject {
            found: json_type(raw),
        }]));
    };

    let mut fields = Fields {
        map,
        issues: Vec::new(),
    };

    for key in map.keys() {
        if !REQUIRED_FIELDS.contains(&key.as_str()) && !OPTIONAL_FIELDS.contains(&key.as_str()) {
            fields.issues.push(EnvelopeError::UnknownField { field: key.clone() });
        }
    }

    let message_id = fields.required_str("message_id");
    let trace_id = fields.required_str("trace_id");
    let timestamp = fields.timestamp();
    let source_module = fields.required_str("source_module");
    let target_module = fields.required_str("target_module");
    let kind = fields.kind();
    let payload_schema = fields.payload_schema();
    let payload_version = fields.required_str("payload_version");
    let module_version = fields.module_version();
    let replay_protection_key = fields.required_str("replay_protection_key");
    let payload = fields.payload();
    let parent_span_id = fields.optional_str("parent_span_id");
    let auth_context = fields.auth_context();
    let expected_previous_hash = fields.optional_str("expected_previous_hash");

    match (
        message_id,
        trace_id,
        timestamp,
        source_module,
        target_module,
        kind,
        payload_schema,
        payload_version,
        module_version,
        replay_protection_key,
        payload,
    ) {
        (
            Some(message_id_value),
            Some(trace_id_value),
            Some(timestamp_value),
            Some(source_value),
            Some(target_value),
            Some(kind_value),
            Some(schema_value),
            Some(payload_version_value),
            Some(module_version_value),
            Some(replay_key_value),
            Some(payload_value),
        ) if fields.issues.is_empty() => Ok(Envelope {
            message_id: message_id_value,
            trace_id: trace_id_value,
            timestamp: timestamp_value,
            source_module: source_value,
            target_module: target_value,
            kind: kind_value,
            payload_schema: schema_value,
            payload_version: payload_version_value,
            module_version: module_version_value,
            replay_protection_key: replay_key_value,
            payload: payload_value,
            parent_span_id: parent_span_id.flatten(),
            auth_context: auth_context.flatten(),
            expected_previous_hash: expected_previous_hash.flatten(),
        }),
        _ => Err(ValidationErrors(fields.issues)),
    }
}

struct Fields<'a> {
    map: &'a Map<String, Value>,
    issues: Vec<EnvelopeError>,
}

impl Fields<'_> {
    fn required_str(&mut self, field: &'static str) -> Option<String> {
        match self.map.get(field) {
            None => {
                self.issues.push(EnvelopeError::MissingField { field });
                None
            }
            Some(value) => self.non_empty_str(field, value),
        }
    }

    /// `Some(None)` when absent, `None` when present but invalid.
    fn optional_str(&mut self, field: &'static str) -> Option<Option<String>> {
        match self.map.get(field) {
            None => Some(None),
            Some(value) => self.non_empty_str(field, value).map(Some),
        }
    }

    fn non_empty_str(&mut self, field: &'static str, value: &Value) -> Option<String> {
        let Value::String(text) = value else {
            self.issues.push(EnvelopeError::WrongType {
                field,
                expected: "a string",
            });
            return None;
        };
        if text.trim().is_empty() {
            self.issues.push(EnvelopeError::EmptyField { field });
            return None;
        }
        Some(text.clone())
    }

    fn timestamp(&mut self) -> Option<u64> {
        let Some(value) = self.map.get("timestamp") else {
            self.issues.push(EnvelopeError::MissingField { field: "timestamp" });
            return None;
        };
        let parsed = value.as_u64();
        if parsed.is_none() {
            self.issues.push(EnvelopeError::WrongType {
                field: "timestamp",
                expected: "a non-negative integer",
            });
        }
        parsed
    }

    fn kind(&mut self) -> Option<MessageKind> {
        let raw = self.required_str("kind")?;
        let parsed = raw.parse::<MessageKind>().ok();
        if parsed.is_none() {
            self.issues.push(EnvelopeError::InvalidKind { value: raw });
        }
        parsed
    }

    fn payload_schema(&mut self) -> Option<String> {
        let raw = self.required_str("payload_schema")?;
        if split_payload_schema(&raw).is_some() {
            Some(raw)
        } else {
            self.issues
                .push(EnvelopeError::InvalidPayloadSchema { value: raw });
            None
        }
    }

    fn module_version(&mut self) -> Option<ModuleVersion> {
        let raw = self.required_str("module_version")?;
        match raw.parse::<ModuleVersion>() {
            Ok(parsed) => Some(parsed),
            Err(source) => {
                self.issues
                    .push(EnvelopeError::InvalidModuleVersion { source });
                None
            }
        }
    }

    fn payload(&mut self) -> Option<Value> {
        let payload = self.map.get("payload").cloned();
        if payload.is_none() {
            self.issues.push(EnvelopeError::MissingField { field: "payload" });
        }
        payload
    }

    fn auth_context(&mut self) -> Option<Option<Map<String, Value>>> {
        match self.map.get("auth_context") {
            None => Some(None),
            Some(Value::Object(context)) => Some(Some(context.clone())),
            Some(_) => {
                self.issues.push(EnvelopeError::WrongType {
                    field: "auth_context",
                    expected: "an object",
                });
                None
            }
        }
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
