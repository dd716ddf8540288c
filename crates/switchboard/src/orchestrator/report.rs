//! Values returned from a dispatch.

use serde::Serialize;
use serde_json::Value;

use crate::error::DispatchFailure;

/// Timings measured with the orchestrator's clock, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchMetrics {
    /// From receipt of the raw input to the final result.
    pub total_duration_ms: u64,
    /// Time spent validating the raw input.
    pub validation_duration_ms: u64,
    /// Time from the end of validation to the final result.
    pub execution_duration_ms: u64,
}

impl DispatchMetrics {
    pub(crate) const fn measure(started: u64, validated: u64, finished: u64) -> Self {
        Self {
            total_duration_ms: finished.saturating_sub(started),
            validation_duration_ms: validated.saturating_sub(started),
            execution_duration_ms: finished.saturating_sub(validated),
        }
    }
}

/// Outcome of one dispatch together with its metrics and correlation ids.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    #[serde(serialize_with = "serialize_result")]
    result: Result<Value, DispatchFailure>,
    metrics: DispatchMetrics,
    trace_id: String,
    message_id: String,
}

impl DispatchReport {
    pub(crate) const fn new(
        result: Result<Value, DispatchFailure>,
        metrics: DispatchMetrics,
        trace_id: String,
        message_id: String,
    ) -> Self {
        Self {
            result,
            metrics,
            trace_id,
            message_id,
        }
    }

    /// The handler's value, or the coded failure.
    #[must_use]
    pub const fn result(&self) -> &Result<Value, DispatchFailure> {
        &self.result
    }

    /// Consumes the report, returning only the result.
    #[must_use]
    pub fn into_result(self) -> Result<Value, DispatchFailure> {
        self.result
    }

    /// Whether the dispatch produced a value.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The failure, when the dispatch did not succeed.
    #[must_use]
    pub fn failure(&self) -> Option<&DispatchFailure> {
        self.result.as_ref().err()
    }

    /// Dispatch timings.
    #[must_use]
    pub const fn metrics(&self) -> DispatchMetrics {
        self.metrics
    }

    /// Trace id of the envelope, or `unknown` for unreadable input.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Message id of the envelope, or `unknown` for unreadable input.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireResult<'a> {
    Success { success: bool, value: &'a Value },
    Failure { success: bool, error: &'a DispatchFailure },
}

fn serialize_result<S: serde::Serializer>(
    result: &Result<Value, DispatchFailure>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let wire = match result {
        Ok(value) => WireResult::Success {
            success: true,
            value,
        },
        Err(error) => WireResult::Failure {
            success: false,
            error,
        },
    };
    wire.serialize(serializer)
}
