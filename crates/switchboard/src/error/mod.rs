//! Caller-facing failure taxonomy and handler error types.
//!
//! Every dispatch that does not succeed resolves to a [`DispatchFailure`]
//! carrying a stable [`ErrorCode`], a message that is safe to show to the
//! caller, and a retry hint. Internal detail such as handler error text is
//! kept out of these values and only reaches the chronicle.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Fixed caller-facing message for handler failures and panics.
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred";

/// Fixed caller-facing message for handlers that exceed their budget.
pub const TIMEOUT_MESSAGE: &str = "Handler execution exceeded its time budget";

/// Fixed caller-facing message when the policy engine itself fails.
pub const POLICY_UNAVAILABLE_MESSAGE: &str = "Policy evaluation failed";

/// Stable error codes reported to dispatch callers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The raw input was not a well-formed envelope.
    ValidationFailed,
    /// The policy engine refused the envelope or failed to evaluate it.
    PolicyRejected,
    /// The replay-protection key was already used under the reject strategy.
    ReplayRejected,
    /// No registered handler accepts the pinned module version.
    NoHandler,
    /// The handler's circuit breaker is refusing traffic.
    CircuitOpen,
    /// The handler returned an error or panicked.
    ExecutionFailed,
    /// The handler did not finish within its execution budget.
    ExecutionTimeout,
}

impl ErrorCode {
    /// Whether callers may retry a failure with this code without changes.
    ///
    /// Policy rejections may override this through the policy decision.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::CircuitOpen | Self::ExecutionFailed | Self::ExecutionTimeout
        )
    }
}

/// A coded, sanitised dispatch failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{error_code}: {message}")]
pub struct DispatchFailure {
    error_code: ErrorCode,
    message: String,
    retryable: bool,
}

impl DispatchFailure {
    /// Creates a failure whose retry hint follows [`ErrorCode::is_retryable`].
    #[must_use]
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            retryable: error_code.is_retryable(),
        }
    }

    /// Overrides the retry hint.
    #[must_use]
    pub const fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Failure for handler errors and panics, with the fixed safe message.
    #[must_use]
    pub fn execution_failed() -> Self {
        Self::new(ErrorCode::ExecutionFailed, INTERNAL_ERROR_MESSAGE)
    }

    /// Failure for handlers that exceeded their budget.
    #[must_use]
    pub fn execution_timeout() -> Self {
        Self::new(ErrorCode::ExecutionTimeout, TIMEOUT_MESSAGE)
    }

    /// Stable error code.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        self.error_code
    }

    /// Caller-safe description of the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the caller may retry.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        self.retryable
    }
}

/// Errors a handler may return from [`crate::Handler::handle`].
///
/// The text of these errors is treated as internal detail. It is logged and
/// written to the chronicle but never returned to the dispatch caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The handler could not complete the request.
    #[error("handler failed: {message}")]
    Failed {
        /// Internal description of the failure.
        message: String,
    },

    /// The handler observed cancellation and stopped early.
    #[error("handler observed cancellation")]
    Cancelled,
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::Failed`].
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}
