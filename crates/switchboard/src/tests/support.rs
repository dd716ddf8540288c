//! Fixtures shared by the module test suites.

use serde_json::{Value, json};

use crate::envelope::Envelope;
use crate::error::HandlerError;
use crate::execution::ExecutionContext;
use crate::handler::Handler;

/// A well-formed `memory.write` command pinned to `memory@3.21.0`.
pub(crate) fn valid_envelope_json(message_id: &str, replay_key: &str) -> Value {
    json!({
        "message_id": message_id,
        "trace_id": "trace-001",
        "timestamp": 1_704_499_200_000_u64,
        "source_module": "gateway",
        "target_module": "memory",
        "kind": "command",
        "payload_schema": "memory.write",
        "payload_version": "v1.0.0",
        "module_version": "memory@3.21.0",
        "replay_protection_key": replay_key,
        "payload": { "key": "test", "value": 42 }
    })
}

pub(crate) fn sample_envelope(message_id: &str, replay_key: &str) -> Envelope {
    Envelope::from_value(&valid_envelope_json(message_id, replay_key))
        .expect("sample envelope is valid")
}

type HandleFn = dyn Fn(&Envelope, &ExecutionContext) -> Result<Value, HandlerError> + Send + Sync;

/// Closure-backed handler for tests that need real behaviour rather than
/// call expectations.
pub(crate) struct FnHandler {
    handle: Box<HandleFn>,
    accepts: bool,
}

impl FnHandler {
    pub(crate) fn new(
        handle: impl Fn(&Envelope, &ExecutionContext) -> Result<Value, HandlerError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            handle: Box::new(handle),
            accepts: true,
        }
    }

    /// Makes [`Handler::can_handle`] decline every envelope.
    pub(crate) fn refusing(self) -> Self {
        Self {
            accepts: false,
            ..self
        }
    }
}

impl Handler for FnHandler {
    fn can_handle(&self, _envelope: &Envelope) -> bool {
        self.accepts
    }

    fn handle(
        &self,
        envelope: &Envelope,
        context: &ExecutionContext,
    ) -> Result<Value, HandlerError> {
        (self.handle)(envelope, context)
    }
}
