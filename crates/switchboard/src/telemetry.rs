//! Structured logging for processes that embed the gateway.
//!
//! The gateway itself only emits `tracing` events under the
//! `switchboard::dispatch`, `switchboard::circuit` and `switchboard::replay`
//! targets. Hosts that do not bring their own subscriber can install one
//! built from the shared [`Config`].

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};

use switchboard_config::{Config, LogFormat};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Proof that the global subscriber is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured log filter expression did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Another subscriber was already installed globally.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber on first use.
///
/// Later calls return a handle without touching global state, so hosts may
/// call this from every entry point.
///
/// # Errors
///
/// Fails when the filter is invalid or a foreign subscriber is already set.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| {
            let subscriber = build_subscriber(config)?;
            tracing::subscriber::set_global_default(subscriber)
                .map_err(TelemetryError::Subscriber)
        })
        .map(|()| TelemetryHandle)
}

/// Builds the subscriber [`initialise`] would install, without installing it.
///
/// Useful with [`tracing::subscriber::with_default`] for scoped capture.
///
/// # Errors
///
/// Fails when the configured filter is invalid.
pub fn build_subscriber(
    config: &Config,
) -> Result<Box<dyn Subscriber + Send + Sync>, TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };
    Ok(subscriber)
}
