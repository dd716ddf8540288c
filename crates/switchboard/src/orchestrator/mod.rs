//! The dispatch pipeline.
//!
//! [`Orchestrator::dispatch`] is the only path that runs a handler. Each call
//! walks the same stages in order and stops at the first refusal:
//!
//! 1. parse and validate the raw input;
//! 2. consult the policy engine, if one is configured;
//! 3. claim the replay key, if replay protection is configured;
//! 4. resolve the exact `module@version` registration;
//! 5. ask the handler's circuit breaker for admission;
//! 6. run the handler under the execution budget.
//!
//! Every stage appends one chronicle record before the next begins. Callers
//! always receive a [`DispatchReport`]; failures carry a stable
//! [`ErrorCode`](crate::ErrorCode) and never the handler's own error text.

mod builder;
mod report;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::DISPATCH_TARGET;
use crate::chronicle::{Chronicle, ChronicleEntry, ChronicleEvent};
use crate::circuit::{Admission, CircuitBreakers, CircuitSnapshot, CircuitState};
use crate::clock::Clock;
use crate::envelope::{Envelope, ValidationErrors, raw_trace_id};
use crate::error::{DispatchFailure, ErrorCode, POLICY_UNAVAILABLE_MESSAGE};
use crate::execution::{self, ExecutionOutcome};
use crate::policy::{PolicyDecision, PolicyEngine};
use crate::registry::HandlerRegistry;
use crate::replay::{ReplayCheck, ReplayGuard};

pub use builder::OrchestratorBuilder;
pub use report::{DispatchMetrics, DispatchReport};

const UNKNOWN_ID: &str = "unknown";

/// Composes validation, policy, replay protection, resolution, circuit
/// breaking and timed execution behind a single entry point.
///
/// An orchestrator is `Send + Sync`; share it behind an [`Arc`] to dispatch
/// from many threads. Contention is limited to the circuit breaker and
/// replay key involved in each call.
pub struct Orchestrator {
    clock: Arc<dyn Clock>,
    registry: Arc<HandlerRegistry>,
    policy: Option<Arc<dyn PolicyEngine>>,
    replay: Option<ReplayGuard>,
    chronicle: Arc<dyn Chronicle>,
    circuits: CircuitBreakers,
    execution_budget: Duration,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("policy", &self.policy.is_some())
            .field("replay", &self.replay)
            .field("circuits", &self.circuits)
            .field("execution_budget", &self.execution_budget)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Starts building an orchestrator around `registry`.
    pub fn builder(registry: HandlerRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry)
    }

    /// Dispatches untyped input through the full pipeline.
    ///
    /// Never panics and never returns early without a report.
    #[must_use]
    pub fn dispatch(&self, raw: &Value) -> DispatchReport {
        let started = self.clock.now_ms();
        let parsed = Envelope::from_value(raw);
        let validated = self.clock.now_ms();
        match parsed {
            Ok(envelope) => self.run(envelope, started, validated),
            Err(errors) => self.refuse_invalid(raw, &errors, started, validated),
        }
    }

    /// Dispatches a JSON document. Unparseable bytes fail validation.
    #[must_use]
    pub fn dispatch_json(&self, bytes: &[u8]) -> DispatchReport {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(raw) => self.dispatch(&raw),
            Err(error) => {
                let now = self.clock.now_ms();
                let mut trail = Trail::new(self, UNKNOWN_ID.to_owned(), None);
                trail.note(ChronicleEvent::ValidationFailed {
                    issues: vec![format!("input is not valid JSON: {error}")],
                });
                let failure =
                    DispatchFailure::new(ErrorCode::ValidationFailed, "Input is not valid JSON");
                self.report(Err(failure), now, now, UNKNOWN_ID, UNKNOWN_ID)
            }
        }
    }

    /// The chronicle every dispatch writes to.
    #[must_use]
    pub fn chronicle(&self) -> Arc<dyn Chronicle> {
        Arc::clone(&self.chronicle)
    }

    /// The registry handlers are resolved from.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// State of every circuit breaker created so far, keyed by `module@version`.
    #[must_use]
    pub fn circuit_states(&self) -> BTreeMap<String, CircuitState> {
        self.circuits.states()
    }

    /// Counters of one circuit breaker.
    #[must_use]
    pub fn circuit_snapshot(&self, handler_key: &str) -> Option<CircuitSnapshot> {
        self.circuits.snapshot(handler_key)
    }

    /// Forces one circuit closed. Returns `false` when it does not exist yet.
    pub fn reset_circuit(&self, handler_key: &str) -> bool {
        self.circuits.reset(handler_key)
    }

    /// Forces every circuit closed.
    pub fn reset_all_circuits(&self) {
        self.circuits.reset_all();
    }

    fn refuse_invalid(
        &self,
        raw: &Value,
        errors: &ValidationErrors,
        started: u64,
        validated: u64,
    ) -> DispatchReport {
        let trace_id = raw_trace_id(raw).to_owned();
        let message_id = raw
            .get("message_id")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_ID)
            .to_owned();
        debug!(
            target: DISPATCH_TARGET,
            trace_id = %trace_id,
            issues = errors.len(),
            "envelope rejected"
        );
        let mut trail = Trail::new(self, trace_id.clone(), Some(message_id.clone()));
        trail.note(ChronicleEvent::ValidationFailed {
            issues: errors.issues().iter().map(ToString::to_string).collect(),
        });
        let failure = DispatchFailure::new(ErrorCode::ValidationFailed, errors.to_string());
        self.report(Err(failure), started, validated, &trace_id, &message_id)
    }

    fn run(&self, envelope: Envelope, started: u64, validated: u64) -> DispatchReport {
        let shared = Arc::new(envelope);
        let mut trail = Trail::new(
            self,
            shared.trace_id().to_owned(),
            Some(shared.message_id().to_owned()),
        );
        trail.note(ChronicleEvent::DispatchReceived);
        trail.note(ChronicleEvent::ValidationOk {
            envelope_digest: shared.digest(),
        });

        let result = self.guarded(&shared, &mut trail, started);
        if let Err(failure) = &result {
            debug!(
                target: DISPATCH_TARGET,
                trace_id = shared.trace_id(),
                message_id = shared.message_id(),
                error_code = %failure.error_code(),
                "dispatch failed"
            );
        }
        self.report(
            result,
            started,
            validated,
            shared.trace_id(),
            shared.message_id(),
        )
    }

    fn guarded(
        &self,
        envelope: &Arc<Envelope>,
        trail: &mut Trail<'_>,
        started: u64,
    ) -> Result<Value, DispatchFailure> {
        self.check_policy(envelope, trail)?;

        let Some(guard) = self.replay.as_ref() else {
            return self.resolve_and_execute(envelope, trail, started);
        };
        let replay_key = envelope.replay_protection_key().to_owned();
        match guard.check_and_record(&replay_key) {
            ReplayCheck::Fresh(ticket) => {
                trail.note(ChronicleEvent::ReplayOk { replay_key });
                let result = self.resolve_and_execute(envelope, trail, started);
                ticket.complete(&result);
                result
            }
            ReplayCheck::Duplicate => {
                trail.note(ChronicleEvent::ReplayRejected { replay_key });
                Err(DispatchFailure::new(
                    ErrorCode::ReplayRejected,
                    "Duplicate message",
                ))
            }
            ReplayCheck::Cached(outcome) => {
                trail.note(ChronicleEvent::ReplayCached { replay_key });
                outcome
            }
        }
    }

    fn check_policy(
        &self,
        envelope: &Envelope,
        trail: &mut Trail<'_>,
    ) -> Result<(), DispatchFailure> {
        let Some(policy) = self.policy.as_ref() else {
            return Ok(());
        };
        match policy.evaluate(envelope) {
            Ok(PolicyDecision::Allow) => {
                trail.note(ChronicleEvent::PolicyOk);
                Ok(())
            }
            Ok(PolicyDecision::Reject { reason, retryable }) => {
                trail.note(ChronicleEvent::PolicyRejected {
                    reason: reason.clone(),
                });
                Err(DispatchFailure::new(ErrorCode::PolicyRejected, reason)
                    .with_retryable(retryable))
            }
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    trace_id = envelope.trace_id(),
                    "policy engine failed"
                );
                trail.note(ChronicleEvent::PolicyRejected {
                    reason: error.to_string(),
                });
                Err(DispatchFailure::new(
                    ErrorCode::PolicyRejected,
                    POLICY_UNAVAILABLE_MESSAGE,
                ))
            }
        }
    }

    fn resolve_and_execute(
        &self,
        envelope: &Arc<Envelope>,
        trail: &mut Trail<'_>,
        started: u64,
    ) -> Result<Value, DispatchFailure> {
        let handler_key = envelope.module_version().key();
        let Some(registration) = self.registry.resolve(envelope.module_version()) else {
            trail.note(ChronicleEvent::NoHandler {
                lookup_key: handler_key.clone(),
                reason: "no handler is registered for this version".to_owned(),
            });
            return Err(DispatchFailure::new(
                ErrorCode::NoHandler,
                format!("No handler registered for {handler_key}"),
            ));
        };
        if let Err(reason) = registration.accepts(envelope) {
            trail.note(ChronicleEvent::NoHandler {
                lookup_key: handler_key.clone(),
                reason,
            });
            return Err(DispatchFailure::new(
                ErrorCode::NoHandler,
                format!("Handler {handler_key} does not accept this envelope"),
            ));
        }
        trail.note(ChronicleEvent::HandlerResolved {
            handler_key: handler_key.clone(),
        });

        let Some(admission) = self.circuits.try_acquire(&handler_key, self.clock.now_ms()) else {
            trail.note(ChronicleEvent::CircuitOpen {
                handler_key: handler_key.clone(),
            });
            return Err(DispatchFailure::new(
                ErrorCode::CircuitOpen,
                format!("Circuit open for {handler_key}"),
            ));
        };

        trail.note(ChronicleEvent::ExecutionStart {
            handler_key: handler_key.clone(),
        });
        let execution_started = self.clock.now_ms();
        let outcome = execution::execute(
            registration.handler(),
            Arc::clone(envelope),
            self.execution_budget,
            format!("switchboard-{handler_key}"),
        );
        let execution_finished = self.clock.now_ms();
        let duration_ms = execution_finished.saturating_sub(execution_started);

        let result = self.settle(
            outcome,
            handler_key,
            admission,
            duration_ms,
            execution_finished,
            trail,
        );
        trail.note(ChronicleEvent::DispatchComplete {
            success: result.is_ok(),
            total_duration_ms: self.clock.now_ms().saturating_sub(started),
        });
        result
    }

    fn settle(
        &self,
        outcome: ExecutionOutcome,
        handler_key: String,
        admission: Admission,
        duration_ms: u64,
        finished_ms: u64,
        trail: &mut Trail<'_>,
    ) -> Result<Value, DispatchFailure> {
        match outcome {
            ExecutionOutcome::Completed(value) => {
                self.circuits.record_success(&handler_key, admission);
                trail.note(ChronicleEvent::ExecutionOk {
                    handler_key,
                    duration_ms,
                });
                Ok(value)
            }
            ExecutionOutcome::Failed { detail } => {
                self.circuits.record_failure(&handler_key, admission, finished_ms);
                debug!(
                    target: DISPATCH_TARGET,
                    handler_key = %handler_key,
                    detail = %detail,
                    "handler failed"
                );
                trail.note(ChronicleEvent::ExecutionFailed {
                    handler_key,
                    error_code: ErrorCode::ExecutionFailed,
                    duration_ms,
                    detail,
                });
                Err(DispatchFailure::execution_failed())
            }
            ExecutionOutcome::TimedOut => {
                self.circuits.record_failure(&handler_key, admission, finished_ms);
                let budget_ms =
                    u64::try_from(self.execution_budget.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    target: DISPATCH_TARGET,
                    handler_key = %handler_key,
                    budget_ms,
                    "handler exceeded its execution budget"
                );
                trail.note(ChronicleEvent::ExecutionFailed {
                    handler_key,
                    error_code: ErrorCode::ExecutionTimeout,
                    duration_ms,
                    detail: format!("no result within {budget_ms} ms"),
                });
                Err(DispatchFailure::execution_timeout())
            }
        }
    }

    fn report(
        &self,
        result: Result<Value, DispatchFailure>,
        started: u64,
        validated: u64,
        trace_id: &str,
        message_id: &str,
    ) -> DispatchReport {
        let finished = self.clock.now_ms();
        DispatchReport::new(
            result,
            DispatchMetrics::measure(started, validated, finished),
            trace_id.to_owned(),
            message_id.to_owned(),
        )
    }
}

/// Appends the records of one dispatch, linking each to its predecessor.
struct Trail<'a> {
    chronicle: &'a dyn Chronicle,
    clock: &'a dyn Clock,
    trace_id: String,
    message_id: Option<String>,
    last_record: Option<String>,
}

impl<'a> Trail<'a> {
    fn new(orchestrator: &'a Orchestrator, trace_id: String, message_id: Option<String>) -> Self {
        Self {
            chronicle: orchestrator.chronicle.as_ref(),
            clock: orchestrator.clock.as_ref(),
            trace_id,
            message_id,
            last_record: None,
        }
    }

    fn note(&mut self, event: ChronicleEvent) {
        let record = self.chronicle.record(ChronicleEntry {
            trace_id: self.trace_id.clone(),
            message_id: self.message_id.clone(),
            parent_id: self.last_record.take(),
            timestamp_ms: self.clock.now_ms(),
            event,
        });
        self.last_record = Some(record.record_id().to_owned());
    }
}
