//! The handler seam and the capability descriptor stored with it.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::envelope::{Envelope, MessageKind};
use crate::error::HandlerError;
use crate::execution::ExecutionContext;

/// Business logic behind one `module@version` registration.
///
/// Handlers run on a worker thread under a time budget. Long-running
/// handlers should poll [`ExecutionContext::is_cancelled`] and return
/// [`HandlerError::Cancelled`] once it is set; a handler that ignores the
/// flag keeps running after the caller has been told it timed out.
pub trait Handler: Send + Sync {
    /// Final say on whether this handler accepts an envelope.
    ///
    /// Called after the descriptor checks pass. The default accepts
    /// everything.
    fn can_handle(&self, _envelope: &Envelope) -> bool {
        true
    }

    /// Processes the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] when the request cannot be completed. The
    /// error text is kept internal.
    fn handle(&self, envelope: &Envelope, context: &ExecutionContext)
    -> Result<Value, HandlerError>;
}

/// Payload schemas and kinds a registration accepts.
///
/// Empty sets accept anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerDescriptor {
    schemas: BTreeSet<String>,
    kinds: BTreeSet<MessageKind>,
}

impl HandlerDescriptor {
    /// Creates a descriptor accepting every schema and kind.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an accepted payload schema.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schemas.insert(schema.into());
        self
    }

    /// Adds an accepted message kind.
    #[must_use]
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    /// Accepted payload schemas.
    #[must_use]
    pub const fn schemas(&self) -> &BTreeSet<String> {
        &self.schemas
    }

    /// Accepted message kinds.
    #[must_use]
    pub const fn kinds(&self) -> &BTreeSet<MessageKind> {
        &self.kinds
    }

    /// Whether the payload schema is accepted.
    #[must_use]
    pub fn supports_schema(&self, schema: &str) -> bool {
        self.schemas.is_empty() || self.schemas.contains(schema)
    }

    /// Whether the message kind is accepted.
    #[must_use]
    pub fn supports_kind(&self, kind: MessageKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}
