//! Shared configuration for the switchboard dispatcher.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! TOML file passed with `--config-path`, then `SWITCHBOARD_*` environment
//! variables, then command-line flags. [`Config::validate`] rejects
//! combinations the dispatcher cannot honour before any component is built.

mod defaults;
mod logging;
mod replay;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_CIRCUIT_FAILURE_THRESHOLD, DEFAULT_CIRCUIT_HALF_OPEN_TRIALS,
    DEFAULT_CIRCUIT_RECOVERY_MS, DEFAULT_CIRCUIT_SUCCESS_THRESHOLD, DEFAULT_EXECUTION_TIMEOUT_MS,
    DEFAULT_LOG_FILTER, default_log_filter, default_log_filter_string, default_log_format,
    default_replay_strategy,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use ortho_config::OrthoError;
pub use replay::{ReplayStrategy, ReplayStrategyParseError};

/// Dispatcher configuration resolved from defaults, files, environment, and CLI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "SWITCHBOARD")]
pub struct Config {
    /// Tracing filter expression, e.g. `info` or `switchboard::circuit=debug`.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format used by the telemetry subscriber.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Budget granted to each handler invocation, in milliseconds.
    #[ortho_config(default = DEFAULT_EXECUTION_TIMEOUT_MS)]
    pub execution_timeout_ms: u64,
    /// Consecutive failures that open a closed circuit.
    #[ortho_config(default = DEFAULT_CIRCUIT_FAILURE_THRESHOLD)]
    pub circuit_failure_threshold: u32,
    /// Milliseconds an open circuit waits before admitting a trial.
    #[ortho_config(default = DEFAULT_CIRCUIT_RECOVERY_MS)]
    pub circuit_recovery_ms: u64,
    /// Consecutive half-open successes needed to close a circuit.
    #[ortho_config(default = DEFAULT_CIRCUIT_SUCCESS_THRESHOLD)]
    pub circuit_success_threshold: u32,
    /// Trial requests a half-open circuit admits at the same time.
    #[ortho_config(default = DEFAULT_CIRCUIT_HALF_OPEN_TRIALS)]
    pub circuit_half_open_trials: u32,
    /// Behaviour for duplicate replay-protection keys.
    #[ortho_config(default = default_replay_strategy())]
    pub replay_strategy: ReplayStrategy,
    /// Maximum number of remembered replay keys; unbounded when absent.
    pub replay_capacity: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            execution_timeout_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
            circuit_failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            circuit_recovery_ms: DEFAULT_CIRCUIT_RECOVERY_MS,
            circuit_success_threshold: DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
            circuit_half_open_trials: DEFAULT_CIRCUIT_HALF_OPEN_TRIALS,
            replay_strategy: default_replay_strategy(),
            replay_capacity: None,
        }
    }
}

impl Config {
    /// Returns the tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Returns the log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns the handler execution budget in milliseconds.
    #[must_use]
    pub const fn execution_timeout_ms(&self) -> u64 {
        self.execution_timeout_ms
    }

    /// Returns the failure threshold that opens a circuit.
    #[must_use]
    pub const fn circuit_failure_threshold(&self) -> u32 {
        self.circuit_failure_threshold
    }

    /// Returns the open-circuit recovery delay in milliseconds.
    #[must_use]
    pub const fn circuit_recovery_ms(&self) -> u64 {
        self.circuit_recovery_ms
    }

    /// Returns the success threshold that closes a half-open circuit.
    #[must_use]
    pub const fn circuit_success_threshold(&self) -> u32 {
        self.circuit_success_threshold
    }

    /// Returns how many concurrent trials a half-open circuit admits.
    #[must_use]
    pub const fn circuit_half_open_trials(&self) -> u32 {
        self.circuit_half_open_trials
    }

    /// Returns the replay strategy.
    #[must_use]
    pub const fn replay_strategy(&self) -> ReplayStrategy {
        self.replay_strategy
    }

    /// Returns the replay key capacity, if bounded.
    #[must_use]
    pub const fn replay_capacity(&self) -> Option<usize> {
        self.replay_capacity
    }

    /// Checks that every numeric setting is usable by the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first offending field.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.execution_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue {
                field: "execution_timeout_ms",
            });
        }
        if self.circuit_failure_threshold == 0 {
            return Err(ConfigError::ZeroValue {
                field: "circuit_failure_threshold",
            });
        }
        if self.circuit_success_threshold == 0 {
            return Err(ConfigError::ZeroValue {
                field: "circuit_success_threshold",
            });
        }
        if self.circuit_half_open_trials == 0 {
            return Err(ConfigError::ZeroValue {
                field: "circuit_half_open_trials",
            });
        }
        if let Some(0) = self.replay_capacity {
            return Err(ConfigError::ZeroValue {
                field: "replay_capacity",
            });
        }
        Ok(())
    }
}

/// Errors raised when a loaded configuration cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A setting that must be positive was zero.
    #[error("configuration field '{field}' must be greater than zero")]
    ZeroValue {
        /// Name of the offending field.
        field: &'static str,
    },
}
