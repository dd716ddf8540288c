//! Per-handler circuit breakers.
//!
//! A breaker starts closed. Consecutive failures open it; once the recovery
//! time has elapsed the next admission check moves it to half-open and lets
//! a bounded number of trial calls through. Enough consecutive trial
//! successes close it again and any trial failure reopens it. Each call
//! carries an [`Admission`] token, so calls admitted before the last
//! transition cannot move the half-open counters. There is no
//! background timer: every transition happens inside a method call.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use switchboard_config::{
    Config, DEFAULT_CIRCUIT_FAILURE_THRESHOLD, DEFAULT_CIRCUIT_HALF_OPEN_TRIALS,
    DEFAULT_CIRCUIT_RECOVERY_MS, DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
};

pub(crate) const CIRCUIT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::circuit");

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are refused until the recovery time elapses.
    Open,
    /// A bounded number of trial calls test the handler.
    HalfOpen,
}

/// Thresholds shared by every breaker an orchestrator creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit. At least 1.
    pub failure_threshold: u32,
    /// Milliseconds an open circuit refuses calls.
    pub recovery_time_ms: u64,
    /// Consecutive half-open successes that close the circuit. At least 1.
    pub success_threshold: u32,
    /// Trial calls admitted concurrently while half-open. At least 1.
    pub half_open_max_trials: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            recovery_time_ms: DEFAULT_CIRCUIT_RECOVERY_MS,
            success_threshold: DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
            half_open_max_trials: DEFAULT_CIRCUIT_HALF_OPEN_TRIALS,
        }
    }
}

impl CircuitBreakerConfig {
    /// Reads the circuit settings from a loaded configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            failure_threshold: config.circuit_failure_threshold(),
            recovery_time_ms: config.circuit_recovery_ms(),
            success_threshold: config.circuit_success_threshold(),
            half_open_max_trials: config.circuit_half_open_trials(),
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures.
    pub failure_count: u32,
    /// Consecutive half-open successes.
    pub success_count: u32,
    /// When the circuit last opened.
    pub opened_at_ms: Option<u64>,
    /// When the last failure was recorded.
    pub last_failure_ms: Option<u64>,
}

/// Proof that a call was admitted, handed back when the call finishes.
///
/// The breaker bumps its generation whenever it opens or closes. A token
/// from an earlier generation is stale: its outcome cannot close or reopen
/// the circuit, and only half-open trial tokens move the trial counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Admission {
    generation: u64,
    trial: bool,
}

impl Admission {
    /// Whether the call was admitted as a half-open trial.
    #[must_use]
    pub const fn is_trial(&self) -> bool {
        self.trial
    }

    /// Breaker generation that admitted the call.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// State machine guarding one `module@version` handler.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at_ms: Option<u64>,
    last_failure_ms: Option<u64>,
    trials_in_flight: u32,
    generation: u64,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    ///
    /// Zero thresholds are raised to one.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                success_threshold: config.success_threshold.max(1),
                half_open_max_trials: config.half_open_max_trials.max(1),
                ..config
            },
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at_ms: None,
            last_failure_ms: None,
            trials_in_flight: 0,
            generation: 0,
        }
    }

    /// Current state, without triggering the recovery transition.
    #[must_use]
    pub const fn state(&self) -> CircuitState {
        self.state
    }

    /// Snapshot of counters and timestamps.
    #[must_use]
    pub const fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            opened_at_ms: self.opened_at_ms,
            last_failure_ms: self.last_failure_ms,
        }
    }

    /// Decides whether a call may proceed at `now_ms`.
    ///
    /// An open circuit whose recovery time has elapsed becomes half-open
    /// during this call and admits the caller as its first trial. A
    /// half-open circuit admits callers while fewer than
    /// [`CircuitBreakerConfig::half_open_max_trials`] trials are
    /// unresolved. The returned token must be passed to
    /// [`CircuitBreaker::record_success`] or
    /// [`CircuitBreaker::record_failure`].
    pub fn can_execute(&mut self, now_ms: u64) -> Option<Admission> {
        match self.state {
            CircuitState::Closed => Some(self.admission(false)),
            CircuitState::Open => {
                let opened_at = self.opened_at_ms.unwrap_or(now_ms);
                if now_ms.saturating_sub(opened_at) < self.config.recovery_time_ms {
                    return None;
                }
                self.state = CircuitState::HalfOpen;
                self.success_count = 0;
                self.trials_in_flight = 1;
                Some(self.admission(true))
            }
            CircuitState::HalfOpen => {
                if self.trials_in_flight < self.config.half_open_max_trials {
                    self.trials_in_flight += 1;
                    Some(self.admission(true))
                } else {
                    None
                }
            }
        }
    }

    /// Records a successful call.
    ///
    /// Tokens issued before the last open or close are ignored.
    pub fn record_success(&mut self, admission: Admission) {
        if !self.is_current(admission) {
            return;
        }
        match self.state {
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::HalfOpen if admission.trial => {
                self.trials_in_flight = self.trials_in_flight.saturating_sub(1);
                self.success_count = self.success_count.saturating_add(1);
                if self.success_count >= self.config.success_threshold {
                    self.close();
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    /// Records a failed call observed at `now_ms`.
    ///
    /// Only `last_failure_ms` moves for a stale token.
    pub fn record_failure(&mut self, admission: Admission, now_ms: u64) {
        self.last_failure_ms = Some(now_ms);
        if !self.is_current(admission) {
            return;
        }
        match self.state {
            CircuitState::Closed => {
                self.failure_count = self.failure_count.saturating_add(1);
                if self.failure_count >= self.config.failure_threshold {
                    self.open(now_ms);
                }
            }
            CircuitState::HalfOpen if admission.trial => {
                self.failure_count = self.failure_count.saturating_add(1);
                self.open(now_ms);
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    /// Forces the breaker closed with zeroed counters.
    pub fn reset(&mut self) {
        self.close();
        self.failure_count = 0;
        self.last_failure_ms = None;
    }

    const fn admission(&self, trial: bool) -> Admission {
        Admission {
            generation: self.generation,
            trial,
        }
    }

    const fn is_current(&self, admission: Admission) -> bool {
        admission.generation == self.generation
    }

    fn open(&mut self, now_ms: u64) {
        self.state = CircuitState::Open;
        self.opened_at_ms = Some(now_ms);
        self.success_count = 0;
        self.trials_in_flight = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.opened_at_ms = None;
        self.trials_in_flight = 0;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Lazily created breakers keyed by `module@version`.
///
/// The map lock is only held while a breaker is looked up or created; each
/// breaker has its own lock, so unrelated handlers never contend.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<Mutex<CircuitBreaker>>>>,
}

impl CircuitBreakers {
    /// Creates an empty set sharing `config`.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Thresholds applied to new breakers.
    #[must_use]
    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<CircuitBreaker>>>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn breaker(&self, key: &str) -> Arc<Mutex<CircuitBreaker>> {
        let mut map = self.map();
        let entry = map
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::new(self.config))));
        Arc::clone(entry)
    }

    /// Admission check for `key`, creating its breaker on first use.
    ///
    /// Returns `None` when the circuit refuses the call.
    #[must_use]
    pub fn try_acquire(&self, key: &str, now_ms: u64) -> Option<Admission> {
        let breaker = self.breaker(key);
        let mut guard = lock(&breaker);
        let before = guard.state();
        let admitted = guard.can_execute(now_ms);
        if before != guard.state() {
            info!(
                target: CIRCUIT_TARGET,
                handler_key = key,
                from = %before,
                to = %guard.state(),
                "circuit state changed"
            );
        }
        if admitted.is_none() {
            debug!(target: CIRCUIT_TARGET, handler_key = key, "circuit refused call");
        }
        admitted
    }

    /// Records a successful call against `key`.
    pub fn record_success(&self, key: &str, admission: Admission) {
        let breaker = self.breaker(key);
        let mut guard = lock(&breaker);
        let before = guard.state();
        guard.record_success(admission);
        if before != guard.state() {
            info!(
                target: CIRCUIT_TARGET,
                handler_key = key,
                from = %before,
                to = %guard.state(),
                "circuit state changed"
            );
        }
    }

    /// Records a failed call against `key`.
    pub fn record_failure(&self, key: &str, admission: Admission, now_ms: u64) {
        let breaker = self.breaker(key);
        let mut guard = lock(&breaker);
        let before = guard.state();
        guard.record_failure(admission, now_ms);
        if before != guard.state() {
            warn!(
                target: CIRCUIT_TARGET,
                handler_key = key,
                from = %before,
                to = %guard.state(),
                failures = guard.snapshot().failure_count,
                "circuit state changed"
            );
        }
    }

    /// Snapshot of one breaker, if it exists.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<CircuitSnapshot> {
        let breaker = self.map().get(key).map(Arc::clone)?;
        let snapshot = lock(&breaker).snapshot();
        Some(snapshot)
    }

    /// States of every breaker created so far, keyed by `module@version`.
    #[must_use]
    pub fn states(&self) -> BTreeMap<String, CircuitState> {
        let breakers: Vec<(String, Arc<Mutex<CircuitBreaker>>)> = self
            .map()
            .iter()
            .map(|(key, breaker)| (key.clone(), Arc::clone(breaker)))
            .collect();
        breakers
            .into_iter()
            .map(|(key, breaker)| {
                let state = lock(&breaker).state();
                (key, state)
            })
            .collect()
    }

    /// Resets one breaker. Returns `false` when none exists for `key`.
    #[must_use]
    pub fn reset(&self, key: &str) -> bool {
        let Some(breaker) = self.map().get(key).map(Arc::clone) else {
            return false;
        };
        lock(&breaker).reset();
        info!(target: CIRCUIT_TARGET, handler_key = key, "circuit reset");
        true
    }

    /// Resets every breaker.
    pub fn reset_all(&self) {
        let breakers: Vec<Arc<Mutex<CircuitBreaker>>> = self.map().values().map(Arc::clone).collect();
        for breaker in breakers {
            lock(&breaker).reset();
        }
        info!(target: CIRCUIT_TARGET, "all circuits reset");
    }
}

fn lock(breaker: &Mutex<CircuitBreaker>) -> MutexGuard<'_, CircuitBreaker> {
    breaker.lock().unwrap_or_else(PoisonError::into_inner)
}
