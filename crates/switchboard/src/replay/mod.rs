//! Replay protection keyed by the caller's idempotency token.
//!
//! Under [`ReplayStrategy::Reject`] the first dispatch to present a key
//! claims it with an atomic insert and every later one is refused. Under
//! [`ReplayStrategy::Idempotent`] the first dispatch becomes the leader for
//! its key: concurrent duplicates block until the leader publishes its
//! outcome and then receive that outcome, while later duplicates are served
//! the cached value from the store. Only successful results are stored.

mod store;

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;

pub use store::{InMemoryReplayStore, ReplayEntry, ReplayStore, ReplayStoreError};
pub use switchboard_config::ReplayStrategy;

use crate::error::DispatchFailure;

pub(crate) const REPLAY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::replay");

/// Result of checking a replay key.
#[derive(Debug)]
pub enum ReplayCheck<'a> {
    /// The key is new; the holder must report the dispatch outcome.
    Fresh(ReplayTicket<'a>),
    /// The key was used before and nothing is cached for it.
    Duplicate,
    /// The key was used before; this is the first dispatch's outcome.
    Cached(Result<Value, DispatchFailure>),
}

/// Atomic check-and-record over a [`ReplayStore`].
pub struct ReplayGuard {
    strategy: ReplayStrategy,
    store: Arc<dyn ReplayStore>,
    in_flight: Mutex<HashMap<String, Arc<Slot>>>,
}

impl std::fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayGuard")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Pending,
    Done(Result<Value, DispatchFailure>),
    Abandoned,
}

impl Slot {
    fn publish(&self, state: SlotState) {
        *lock(&self.state) = state;
        self.ready.notify_all();
    }

    fn wait(&self) -> Option<Result<Value, DispatchFailure>> {
        let mut state = lock(&self.state);
        loop {
            match &*state {
                SlotState::Pending => {
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                SlotState::Done(outcome) => return Some(outcome.clone()),
                SlotState::Abandoned => return None,
            }
        }
    }
}

impl ReplayGuard {
    /// Creates a guard over `store`.
    #[must_use]
    pub fn new(strategy: ReplayStrategy, store: Arc<dyn ReplayStore>) -> Self {
        Self {
            strategy,
            store,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Strategy applied to duplicates.
    #[must_use]
    pub const fn strategy(&self) -> ReplayStrategy {
        self.strategy
    }

    /// Backing store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ReplayStore> {
        Arc::clone(&self.store)
    }

    /// Checks `key` and claims it when unseen, as one atomic step.
    ///
    /// Under the idempotent strategy this blocks while another dispatch with
    /// the same key is still executing.
    #[must_use]
    pub fn check_and_record(&self, key: &str) -> ReplayCheck<'_> {
        match self.strategy {
            ReplayStrategy::Reject => self.claim_once(key),
            ReplayStrategy::Idempotent => self.claim_or_follow(key),
        }
    }

    fn claim_once(&self, key: &str) -> ReplayCheck<'_> {
        match self.store.set(key, ReplayEntry::Seen) {
            Ok(()) => ReplayCheck::Fresh(ReplayTicket::new(self, key, None)),
            Err(error) => {
                debug!(target: REPLAY_TARGET, replay_key = key, %error, "duplicate replay key");
                ReplayCheck::Duplicate
            }
        }
    }

    fn claim_or_follow(&self, key: &str) -> ReplayCheck<'_> {
        loop {
            let slot = {
                let mut in_flight = lock(&self.in_flight);
                match self.store.get(key) {
                    Some(ReplayEntry::Completed(value)) => return ReplayCheck::Cached(Ok(value)),
                    Some(ReplayEntry::Seen) => return ReplayCheck::Duplicate,
                    None => {}
                }
                if let Some(existing) = in_flight.get(key) {
                    Arc::clone(existing)
                } else {
                    let fresh = Arc::new(Slot::default());
                    in_flight.insert(key.to_owned(), Arc::clone(&fresh));
                    return ReplayCheck::Fresh(ReplayTicket::new(self, key, Some(fresh)));
                }
            };
            debug!(target: REPLAY_TARGET, replay_key = key, "waiting for in-flight dispatch");
            if let Some(outcome) = slot.wait() {
                return ReplayCheck::Cached(outcome);
            }
            debug!(target: REPLAY_TARGET, replay_key = key, "leader abandoned key, retrying");
        }
    }

    fn release(&self, key: &str) {
        lock(&self.in_flight).remove(key);
    }
}

/// Claim on a fresh replay key, held for the rest of the dispatch.
///
/// Dropping the ticket without calling [`ReplayTicket::complete`] releases
/// the key so blocked duplicates retry.
#[derive(Debug)]
pub struct ReplayTicket<'a> {
    guard: &'a ReplayGuard,
    key: String,
    slot: Option<Arc<Slot>>,
    completed: bool,
}

impl<'a> ReplayTicket<'a> {
    fn new(guard: &'a ReplayGuard, key: &str, slot: Option<Arc<Slot>>) -> Self {
        Self {
            guard,
            key: key.to_owned(),
            slot,
            completed: false,
        }
    }

    /// The claimed key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publishes the dispatch outcome, caching it when it succeeded.
    pub fn complete(mut self, outcome: &Result<Value, DispatchFailure>) {
        self.completed = true;
        let Some(slot) = self.slot.take() else {
            return;
        };
        if let Ok(value) = outcome {
            if let Err(error) = self
                .guard
                .store
                .set(&self.key, ReplayEntry::Completed(value.clone()))
            {
                debug!(target: REPLAY_TARGET, replay_key = %self.key, %error, "result already cached");
            }
        }
        self.guard.release(&self.key);
        slot.publish(SlotState::Done(outcome.clone()));
    }
}

impl Drop for ReplayTicket<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if let Some(slot) = self.slot.take() {
            self.guard.release(&self.key);
            slot.publish(SlotState::Abandoned);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
