//! Policy engines consulted before any handler state is touched.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::envelope::{Envelope, MessageKind};

/// Verdict returned by a [`PolicyEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The envelope may proceed.
    Allow,
    /// The envelope is refused.
    Reject {
        /// Caller-visible reason.
        reason: String,
        /// Whether the caller may retry unchanged.
        retryable: bool,
    },
}

impl PolicyDecision {
    /// Non-retryable rejection.
    #[must_use]
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
            retryable: false,
        }
    }

    /// Whether the decision allows the envelope.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Failure of the policy engine itself.
///
/// The dispatcher treats these as rejections and keeps the detail internal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The engine could not reach a verdict.
    #[error("policy evaluation failed: {message}")]
    Evaluation {
        /// Internal failure description.
        message: String,
    },
}

/// Allow/deny gate evaluated before replay protection and handler lookup.
pub trait PolicyEngine: Send + Sync {
    /// Evaluates a validated envelope.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when no verdict can be reached.
    fn evaluate(&self, envelope: &Envelope) -> Result<PolicyDecision, PolicyError>;
}

/// Allows every envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PolicyEngine for AllowAll {
    fn evaluate(&self, _envelope: &Envelope) -> Result<PolicyDecision, PolicyError> {
        Ok(PolicyDecision::Allow)
    }
}

/// Rejects every envelope with a fixed reason.
#[derive(Debug, Clone)]
pub struct DenyAll {
    reason: String,
}

impl DenyAll {
    /// Creates a policy rejecting with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for DenyAll {
    fn default() -> Self {
        Self::new("dispatch is disabled by policy")
    }
}

impl PolicyEngine for DenyAll {
    fn evaluate(&self, _envelope: &Envelope) -> Result<PolicyDecision, PolicyError> {
        Ok(PolicyDecision::reject(self.reason.clone()))
    }
}

/// Allow-list policy over sources, targets, kinds, schemas and payload size.
///
/// Every rule left unset allows everything.
#[derive(Debug, Clone, Default)]
pub struct RulePolicy {
    allowed_sources: BTreeSet<String>,
    allowed_targets: BTreeSet<String>,
    allowed_kinds: BTreeSet<MessageKind>,
    allowed_schemas: BTreeMap<String, BTreeSet<String>>,
    max_payload_bytes: Option<usize>,
}

impl RulePolicy {
    /// Creates a policy that allows everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a permitted source module.
    #[must_use]
    pub fn allow_source(mut self, module: impl Into<String>) -> Self {
        self.allowed_sources.insert(module.into());
        self
    }

    /// Adds a permitted target module.
    #[must_use]
    pub fn allow_target(mut self, module: impl Into<String>) -> Self {
        self.allowed_targets.insert(module.into());
        self
    }

    /// Adds a permitted message kind.
    #[must_use]
    pub fn allow_kind(mut self, kind: MessageKind) -> Self {
        self.allowed_kinds.insert(kind);
        self
    }

    /// Adds a permitted payload schema for a target module.
    #[must_use]
    pub fn allow_schema(mut self, target: impl Into<String>, schema: impl Into<String>) -> Self {
        self.allowed_schemas
            .entry(target.into())
            .or_default()
            .insert(schema.into());
        self
    }

    /// Caps the serialised payload size.
    #[must_use]
    pub const fn max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = Some(limit);
        self
    }
}

impl PolicyEngine for RulePolicy {
    fn evaluate(&self, envelope: &Envelope) -> Result<PolicyDecision, PolicyError> {
        if !permits(&self.allowed_sources, envelope.source_module()) {
            return Ok(PolicyDecision::reject(format!(
                "source module '{}' is not allowed",
                envelope.source_module()
            )));
        }
        if !permits(&self.allowed_targets, envelope.target_module()) {
            return Ok(PolicyDecision::reject(format!(
                "target module '{}' is not allowed",
                envelope.target_module()
            )));
        }
        if !self.allowed_kinds.is_empty() && !self.allowed_kinds.contains(&envelope.kind()) {
            return Ok(PolicyDecision::reject(format!(
                "kind '{}' is not allowed",
                envelope.kind()
            )));
        }
        if let Some(schemas) = self.allowed_schemas.get(envelope.target_module()) {
            if !schemas.contains(envelope.payload_schema()) {
                return Ok(PolicyDecision::reject(format!(
                    "payload schema '{}' is not allowed for '{}'",
                    envelope.payload_schema(),
                    envelope.target_module()
                )));
            }
        }
        if let Some(limit) = self.max_payload_bytes {
            let size = serde_json::to_vec(envelope.payload())
                .map_err(|error| PolicyError::Evaluation {
                    message: format!("payload could not be measured: {error}"),
                })?
                .len();
            if size > limit {
                return Ok(PolicyDecision::reject(format!(
                    "payload of {size} bytes exceeds the {limit} byte limit"
                )));
            }
        }
        Ok(PolicyDecision::Allow)
    }
}

fn permits(allowed: &BTreeSet<String>, value: &str) -> bool {
    allowed.is_empty() || allowed.contains(value)
}
