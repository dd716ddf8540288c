//! Process-local chronicle sealed into a SHA-256 hash chain.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::{Chronicle, ChronicleEntry, ChronicleEvent, ChronicleRecord};
use crate::envelope::digest::{feed_str, value_digest};

/// Previous-digest value of the first record.
pub const GENESIS_DIGEST: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// In-memory chronicle shared by concurrent dispatches.
#[derive(Debug, Default)]
pub struct InMemoryChronicle {
    ledger: Mutex<Ledger>,
}

#[derive(Debug, Default)]
struct Ledger {
    records: Vec<ChronicleRecord>,
    next_sequence: u64,
}

impl InMemoryChronicle {
    /// Creates an empty chronicle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Chronicle for InMemoryChronicle {
    fn record(&self, entry: ChronicleEntry) -> ChronicleRecord {
        let mut ledger = self.ledger();
        let sequence = ledger.next_sequence;
        let previous_digest = ledger
            .records
            .last()
            .map_or_else(|| GENESIS_DIGEST.to_owned(), |last| last.digest.clone());
        let mut record = ChronicleRecord {
            sequence,
            record_id: format!("rec-{sequence:08}"),
            parent_id: entry.parent_id,
            trace_id: entry.trace_id,
            message_id: entry.message_id,
            timestamp_ms: entry.timestamp_ms,
            event: entry.event,
            previous_digest,
            digest: String::new(),
        };
        record.digest = seal(&record);
        ledger.next_sequence = sequence.saturating_add(1);
        ledger.records.push(record.clone());
        record
    }

    fn snapshot(&self) -> Vec<ChronicleRecord> {
        self.ledger().records.clone()
    }

    fn len(&self) -> usize {
        self.ledger().records.len()
    }

    fn reset(&self) {
        let mut ledger = self.ledger();
        ledger.records.clear();
        ledger.next_sequence = 0;
    }
}

fn seal(record: &ChronicleRecord) -> String {
    let mut hasher = Sha256::new();
    feed_str(&mut hasher, &record.previous_digest);
    feed_str(&mut hasher, &record.sequence.to_string());
    feed_str(&mut hasher, &record.record_id);
    feed_str(&mut hasher, record.parent_id.as_deref().unwrap_or_default());
    feed_str(&mut hasher, &record.trace_id);
    feed_str(&mut hasher, record.message_id.as_deref().unwrap_or_default());
    feed_str(&mut hasher, &record.timestamp_ms.to_string());
    feed_str(&mut hasher, &event_digest(&record.event));
    hex::encode(hasher.finalize())
}

#[cfg(test)]
pub(super) fn seal_for_tests(record: &ChronicleRecord) -> String {
    seal(record)
}

fn event_digest(event: &ChronicleEvent) -> String {
    let canonical = serde_json::to_value(event)
        .unwrap_or_else(|error| Value::String(format!("unserialisable event: {error}")));
    value_digest(&canonical)
}

/// Ways a sequence of records can fail chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// A record is missing or out of order.
    #[error("expected sequence {expected}, found {found}")]
    SequenceGap {
        /// Sequence number that should have appeared.
        expected: u64,
        /// Sequence number that did appear.
        found: u64,
    },

    /// A record does not point at its predecessor's digest.
    #[error("record {sequence} does not link to its predecessor")]
    BrokenLink {
        /// Offending record.
        sequence: u64,
    },

    /// A record's content no longer matches its seal.
    #[error("record {sequence} was modified after sealing")]
    Tampered {
        /// Offending record.
        sequence: u64,
    },
}

/// Checks that `records` form an unbroken chain starting at the genesis.
///
/// Pass a full [`Chronicle::snapshot`]; filtered views such as
/// [`Chronicle::for_trace`] are not contiguous and will not verify.
///
/// # Errors
///
/// Returns the first [`ChainError`] found.
pub fn verify_chain(records: &[ChronicleRecord]) -> Result<(), ChainError> {
    let mut previous = GENESIS_DIGEST;
    for (expected, record) in (0_u64..).zip(records) {
        if record.sequence != expected {
            return Err(ChainError::SequenceGap {
                expected,
                found: record.sequence,
            });
        }
        if record.previous_digest != previous {
            return Err(ChainError::BrokenLink {
                sequence: record.sequence,
            });
        }
        if seal(record) != record.digest {
            return Err(ChainError::Tampered {
                sequence: record.sequence,
            });
        }
        previous = &record.digest;
    }
    Ok(())
}
