//! Append-only audit trail of dispatch lifecycle events.
//!
//! Each pipeline stage appends one [`ChronicleEvent`]. Records are sealed
//! into a hash chain by [`InMemoryChronicle`] so that later edits, removals
//! or reordering can be detected with [`verify_chain`].

mod memory;

use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};

use crate::error::ErrorCode;

pub use memory::{ChainError, GENESIS_DIGEST, InMemoryChronicle, verify_chain};

/// Stable names of chronicle events, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Raw input arrived and passed structural validation.
    DispatchReceived,
    /// The envelope was accepted.
    ValidationOk,
    /// The raw input was rejected.
    ValidationFailed,
    /// The policy engine allowed the envelope.
    PolicyOk,
    /// The policy engine refused the envelope or failed.
    PolicyRejected,
    /// The replay key was claimed for this dispatch.
    ReplayOk,
    /// The replay key had already been used.
    ReplayRejected,
    /// A cached result was returned for a repeated replay key.
    ReplayCached,
    /// A handler registration matched the pinned version.
    HandlerResolved,
    /// No handler could serve the envelope.
    NoHandler,
    /// The handler's circuit breaker refused the call.
    CircuitOpen,
    /// The handler was invoked.
    ExecutionStart,
    /// The handler returned a value.
    ExecutionOk,
    /// The handler failed, panicked or timed out.
    ExecutionFailed,
    /// Final record of a dispatch that reached execution.
    DispatchComplete,
}

/// An event and its stage-specific metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChronicleEvent {
    /// Raw input arrived and was parsed into an envelope.
    DispatchReceived,
    /// The envelope was accepted.
    ValidationOk {
        /// SHA-256 content digest of the envelope.
        envelope_digest: String,
    },
    /// The raw input was rejected.
    ValidationFailed {
        /// Human-readable validation issues.
        issues: Vec<String>,
    },
    /// The policy engine allowed the envelope.
    PolicyOk,
    /// The policy engine refused the envelope or failed.
    PolicyRejected {
        /// Rejection reason or internal policy failure detail.
        reason: String,
    },
    /// The replay key was claimed for this dispatch.
    ReplayOk {
        /// Replay-protection key.
        replay_key: String,
    },
    /// The replay key had already been used.
    ReplayRejected {
        /// Replay-protection key.
        replay_key: String,
    },
    /// A cached result was returned for a repeated replay key.
    ReplayCached {
        /// Replay-protection key.
        replay_key: String,
    },
    /// A handler registration matched the pinned version.
    HandlerResolved {
        /// `module@x.y.z` key.
        handler_key: String,
    },
    /// No handler could serve the envelope.
    NoHandler {
        /// `module@x.y.z` key that was looked up.
        lookup_key: String,
        /// Why resolution failed.
        reason: String,
    },
    /// The handler's circuit breaker refused the call.
    CircuitOpen {
        /// `module@x.y.z` key.
        handler_key: String,
    },
    /// The handler was invoked.
    ExecutionStart {
        /// `module@x.y.z` key.
        handler_key: String,
    },
    /// The handler returned a value.
    ExecutionOk {
        /// `module@x.y.z` key.
        handler_key: String,
        /// Time spent in the handler.
        duration_ms: u64,
    },
    /// The handler failed, panicked or timed out.
    ExecutionFailed {
        /// `module@x.y.z` key.
        handler_key: String,
        /// Code reported to the caller.
        error_code: ErrorCode,
        /// Time until the failure was observed.
        duration_ms: u64,
        /// Internal failure detail, never returned to callers.
        detail: String,
    },
    /// Final record of a dispatch that reached execution.
    DispatchComplete {
        /// Whether the dispatch produced a value.
        success: bool,
        /// Wall time of the whole dispatch.
        total_duration_ms: u64,
    },
}

impl ChronicleEvent {
    /// Stable name of the event.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::DispatchReceived => EventType::DispatchReceived,
            Self::ValidationOk { .. } => EventType::ValidationOk,
            Self::ValidationFailed { .. } => EventType::ValidationFailed,
            Self::PolicyOk => EventType::PolicyOk,
            Self::PolicyRejected { .. } => EventType::PolicyRejected,
            Self::ReplayOk { .. } => EventType::ReplayOk,
            Self::ReplayRejected { .. } => EventType::ReplayRejected,
            Self::ReplayCached { .. } => EventType::ReplayCached,
            Self::HandlerResolved { .. } => EventType::HandlerResolved,
            Self::NoHandler { .. } => EventType::NoHandler,
            Self::CircuitOpen { .. } => EventType::CircuitOpen,
            Self::ExecutionStart { .. } => EventType::ExecutionStart,
            Self::ExecutionOk { .. } => EventType::ExecutionOk,
            Self::ExecutionFailed { .. } => EventType::ExecutionFailed,
            Self::DispatchComplete { .. } => EventType::DispatchComplete,
        }
    }
}

/// An event awaiting a sequence number and seal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChronicleEntry {
    /// Trace the event belongs to.
    pub trace_id: String,
    /// Message the event belongs to, when the input carried one.
    pub message_id: Option<String>,
    /// Previous record of the same dispatch.
    pub parent_id: Option<String>,
    /// Time of the event in milliseconds.
    pub timestamp_ms: u64,
    /// The event itself.
    pub event: ChronicleEvent,
}

/// A sealed, immutable chronicle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChronicleRecord {
    sequence: u64,
    record_id: String,
    parent_id: Option<String>,
    trace_id: String,
    message_id: Option<String>,
    timestamp_ms: u64,
    #[serde(flatten)]
    event: ChronicleEvent,
    previous_digest: String,
    digest: String,
}

impl ChronicleRecord {
    /// Position in the chronicle, starting at zero.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Identifier of this record.
    #[must_use]
    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    /// Identifier of the previous record of the same dispatch.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Trace id.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Message id, when known.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Event time in milliseconds.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// The recorded event.
    #[must_use]
    pub const fn event(&self) -> &ChronicleEvent {
        &self.event
    }

    /// Shorthand for `event().event_type()`.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event.event_type()
    }

    /// Digest of the preceding record, or [`GENESIS_DIGEST`].
    #[must_use]
    pub fn previous_digest(&self) -> &str {
        &self.previous_digest
    }

    /// SHA-256 seal over this record and the previous digest.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Append-only store of dispatch events.
///
/// Implementations must accept concurrent appends. There is no way to edit
/// or remove individual records; [`Chronicle::reset`] is an owner-level
/// operation that discards the whole log.
pub trait Chronicle: Send + Sync {
    /// Seals and appends an entry, returning the stored record.
    fn record(&self, entry: ChronicleEntry) -> ChronicleRecord;

    /// Copy of every record in append order.
    fn snapshot(&self) -> Vec<ChronicleRecord>;

    /// Number of records.
    fn len(&self) -> usize;

    /// Discards every record and restarts the chain.
    fn reset(&self);

    /// Whether nothing has been recorded.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records for one trace, in append order.
    fn for_trace(&self, trace_id: &str) -> Vec<ChronicleRecord> {
        self.snapshot()
            .into_iter()
            .filter(|record| record.trace_id() == trace_id)
            .collect()
    }

    /// Records for one message, in append order.
    fn for_message(&self, message_id: &str) -> Vec<ChronicleRecord> {
        self.snapshot()
            .into_iter()
            .filter(|record| record.message_id() == Some(message_id))
            .collect()
    }
}
