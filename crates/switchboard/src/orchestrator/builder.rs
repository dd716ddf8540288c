//! Assembly of an [`Orchestrator`] from its collaborators.

use std::sync::Arc;
use std::time::Duration;

use switchboard_config::{Config, DEFAULT_EXECUTION_TIMEOUT_MS};

use super::Orchestrator;
use crate::chronicle::{Chronicle, InMemoryChronicle};
use crate::circuit::{CircuitBreakerConfig, CircuitBreakers};
use crate::clock::{Clock, SystemClock};
use crate::policy::PolicyEngine;
use crate::registry::HandlerRegistry;
use crate::replay::{InMemoryReplayStore, ReplayGuard};

/// Builder for [`Orchestrator`].
///
/// Only the registry is required. Without a policy engine or replay guard
/// the corresponding stage is skipped and leaves no chronicle record.
#[must_use]
pub struct OrchestratorBuilder {
    registry: HandlerRegistry,
    clock: Option<Arc<dyn Clock>>,
    policy: Option<Arc<dyn PolicyEngine>>,
    replay: Option<ReplayGuard>,
    chronicle: Option<Arc<dyn Chronicle>>,
    circuit_breaker: CircuitBreakerConfig,
    execution_budget: Duration,
}

impl OrchestratorBuilder {
    pub(super) fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            clock: None,
            policy: None,
            replay: None,
            chronicle: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            execution_budget: Duration::from_millis(DEFAULT_EXECUTION_TIMEOUT_MS),
        }
    }

    /// Seeds a builder with the budgets, circuit thresholds and replay
    /// strategy from `config`. Replay results are kept in memory.
    pub fn from_config(config: &Config, registry: HandlerRegistry) -> Self {
        let store = Arc::new(InMemoryReplayStore::from_capacity(config.replay_capacity));
        Self::new(registry)
            .circuit_breaker(CircuitBreakerConfig::from_config(config))
            .execution_budget(Duration::from_millis(config.execution_timeout_ms))
            .replay_guard(ReplayGuard::new(config.replay_strategy, store))
    }

    /// Time source for metrics, chronicle timestamps and circuit recovery.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Policy engine consulted before replay protection.
    pub fn policy(mut self, policy: Arc<dyn PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Replay protection for the `replay_protection_key` field.
    pub fn replay_guard(mut self, guard: ReplayGuard) -> Self {
        self.replay = Some(guard);
        self
    }

    /// Chronicle to append to. Defaults to a fresh [`InMemoryChronicle`].
    pub fn chronicle(mut self, chronicle: Arc<dyn Chronicle>) -> Self {
        self.chronicle = Some(chronicle);
        self
    }

    /// Thresholds shared by every per-handler circuit breaker.
    pub const fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Wall time a handler may run before the dispatch times out.
    pub const fn execution_budget(mut self, budget: Duration) -> Self {
        self.execution_budget = budget;
        self
    }

    /// Finishes the orchestrator.
    #[must_use]
    pub fn build(self) -> Orchestrator {
        Orchestrator {
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::new())),
            registry: Arc::new(self.registry),
            policy: self.policy,
            replay: self.replay,
            chronicle: self
                .chronicle
                .unwrap_or_else(|| Arc::new(InMemoryChronicle::new())),
            circuits: CircuitBreakers::new(self.circuit_breaker),
            execution_budget: self.execution_budget,
        }
    }
}
