//! Message-dispatch gateway.
//!
//! `switchboard` routes validated envelopes to version-pinned handlers. Every
//! message passes through the same pipeline, owned by the [`Orchestrator`]:
//! schema validation, an optional [`PolicyEngine`], replay protection keyed
//! by the caller's idempotency token, exact `module@version` resolution in
//! the [`HandlerRegistry`], a per-handler [`CircuitBreaker`], and execution
//! under a wall-time budget. Each stage appends to a hash-chained
//! [`Chronicle`], and each call yields a [`DispatchReport`] with a stable
//! [`ErrorCode`] on failure.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use switchboard::{HandlerDescriptor, HandlerRegistry, Orchestrator};
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("memory", "3.21.0", Arc::new(MemoryWrite), HandlerDescriptor::new())?;
//! let orchestrator = Orchestrator::builder(registry).build();
//! let report = orchestrator.dispatch(&json!({ /* envelope fields */ }));
//! ```

pub mod chronicle;
pub mod circuit;
pub mod clock;
pub mod envelope;
pub mod error;
pub mod execution;
pub mod handler;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod replay;
pub mod telemetry;

#[cfg(test)]
mod tests;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

pub use self::chronicle::{
    Chronicle, ChronicleEntry, ChronicleEvent, ChronicleRecord, EventType, InMemoryChronicle,
};
pub use self::circuit::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
};
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::envelope::{Envelope, EnvelopeBuilder, MessageKind, ModuleVersion, Version};
pub use self::error::{DispatchFailure, ErrorCode, HandlerError};
pub use self::execution::ExecutionContext;
pub use self::handler::{Handler, HandlerDescriptor};
pub use self::orchestrator::{DispatchMetrics, DispatchReport, Orchestrator, OrchestratorBuilder};
pub use self::policy::{PolicyDecision, PolicyEngine, PolicyError};
pub use self::registry::{HandlerRegistry, Registration, RegistryError};
pub use self::replay::{InMemoryReplayStore, ReplayGuard, ReplayStore, ReplayStrategy};
pub use switchboard_config::Config;
