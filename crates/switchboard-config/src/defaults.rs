use crate::logging::LogFormat;
use crate::replay::ReplayStrategy;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default handler execution budget in milliseconds.
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 30_000;

/// Consecutive failures that open a closed circuit.
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Time an open circuit waits before admitting a trial request.
pub const DEFAULT_CIRCUIT_RECOVERY_MS: u64 = 30_000;

/// Consecutive half-open successes that close the circuit again.
pub const DEFAULT_CIRCUIT_SUCCESS_THRESHOLD: u32 = 3;

/// Trial requests a half-open circuit admits concurrently.
pub const DEFAULT_CIRCUIT_HALF_OPEN_TRIALS: u32 = 1;

/// Default log filter expression.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default replay strategy.
#[must_use]
pub const fn default_replay_strategy() -> ReplayStrategy {
    ReplayStrategy::Reject
}
